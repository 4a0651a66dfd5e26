//! Lightweight model of Python-like source text.
//!
//! Only what the pipeline needs: logical lines (comments stripped, strings
//! kept), top-level statements with exact byte ranges, and import syntax.
//! It does not validate the program.

/// One `;`-separated piece of a logical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub code: String,
    pub end: usize,
}

/// A logical line: physical lines joined by brackets, strings, or `\`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub first_line: usize,
    pub last_line: usize,
    pub indent: usize,
    pub segments: Vec<Segment>,
}

impl LogicalLine {
    pub fn head(&self) -> &str {
        self.segments
            .first()
            .map(|segment| segment.code.as_str())
            .unwrap_or_default()
    }

    fn end(&self) -> usize {
        self.segments.last().map_or(0, |segment| segment.end)
    }
}

/// A top-level statement, indexed like the module body of the parsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub index: usize,
    pub first_line: usize,
    pub last_line: usize,
    /// Byte offset just past the statement's last character.
    pub end: usize,
    pub code: String,
}

#[derive(Default)]
struct SegmentBuilder {
    code: String,
    start: Option<usize>,
    end: usize,
}

impl SegmentBuilder {
    fn push(&mut self, offset: usize, ch: char) {
        if !ch.is_whitespace() {
            self.start.get_or_insert(offset);
            self.end = offset + ch.len_utf8();
        }
        self.code.push(ch);
    }

    fn finish(&mut self, segments: &mut Vec<Segment>) {
        let builder = std::mem::take(self);
        let code = builder.code.trim();
        if !code.is_empty() && builder.start.is_some() {
            segments.push(Segment {
                code: code.to_string(),
                end: builder.end,
            });
        }
    }
}

struct LineBuilder {
    first_line: usize,
    indent: usize,
    segments: Vec<Segment>,
    current: SegmentBuilder,
}

impl LineBuilder {
    fn finish(mut self, last_line: usize, lines: &mut Vec<LogicalLine>) {
        self.current.finish(&mut self.segments);
        if !self.segments.is_empty() {
            lines.push(LogicalLine {
                first_line: self.first_line,
                last_line,
                indent: self.indent,
                segments: self.segments,
            });
        }
    }
}

/// Split `text` into logical lines.
pub fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut lines = Vec::new();
    let mut line_no = 0usize;
    let mut depth = 0usize;
    let mut builder: Option<LineBuilder> = None;
    let mut i = 0usize;

    while i < chars.len() {
        let Some(line) = builder.as_mut() else {
            let mut j = i;
            let mut indent = 0usize;
            while j < chars.len() && matches!(chars[j].1, ' ' | '\t' | '\r' | '\x0c') {
                if chars[j].1 != '\r' {
                    indent += 1;
                }
                j += 1;
            }
            match chars.get(j).map(|(_, ch)| *ch) {
                None => break,
                Some('\n') => {
                    line_no += 1;
                    i = j + 1;
                }
                Some('#') => i = skip_comment(&chars, j),
                Some(_) => {
                    builder = Some(LineBuilder {
                        first_line: line_no,
                        indent,
                        segments: Vec::new(),
                        current: SegmentBuilder::default(),
                    });
                    i = j;
                }
            }
            continue;
        };

        let (offset, ch) = chars[i];
        match ch {
            '#' => {
                i = skip_comment(&chars, i);
                continue;
            }
            '\'' | '"' => {
                i = consume_string(&chars, i, &mut line.current, &mut line_no);
                continue;
            }
            '\\' if next_is_newline(&chars, i) => {
                line.current.push(offset, ' ');
                while chars[i].1 != '\n' {
                    i += 1;
                }
                line_no += 1;
            }
            '(' | '[' | '{' => {
                depth += 1;
                line.current.push(offset, ch);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                line.current.push(offset, ch);
            }
            ';' if depth == 0 => line.current.finish(&mut line.segments),
            '\n' => {
                line_no += 1;
                if depth > 0 {
                    line.current.push(offset, ' ');
                } else if let Some(done) = builder.take() {
                    done.finish(line_no - 1, &mut lines);
                }
            }
            '\r' => {}
            _ => line.current.push(offset, ch),
        }
        i += 1;
    }

    if let Some(done) = builder.take() {
        done.finish(line_no, &mut lines);
    }
    lines
}

fn skip_comment(chars: &[(usize, char)], mut i: usize) -> usize {
    while i < chars.len() && chars[i].1 != '\n' {
        i += 1;
    }
    i
}

fn next_is_newline(chars: &[(usize, char)], i: usize) -> bool {
    match chars.get(i + 1).map(|(_, ch)| *ch) {
        Some('\n') => true,
        Some('\r') => chars.get(i + 2).map(|(_, ch)| *ch) == Some('\n'),
        _ => false,
    }
}

/// Copy a string literal starting at `i` into `segment`; returns the index
/// after the closing quote. Unterminated single-quoted strings stop at the
/// end of the physical line.
fn consume_string(
    chars: &[(usize, char)],
    mut i: usize,
    segment: &mut SegmentBuilder,
    line_no: &mut usize,
) -> usize {
    let quote = chars[i].1;
    let triple = chars.get(i + 1).map(|(_, ch)| *ch) == Some(quote)
        && chars.get(i + 2).map(|(_, ch)| *ch) == Some(quote);
    let width = if triple { 3 } else { 1 };
    for _ in 0..width {
        segment.push(chars[i].0, quote);
        i += 1;
    }
    while i < chars.len() {
        let (offset, ch) = chars[i];
        if ch == '\\' {
            segment.push(offset, ch);
            if let Some((next_offset, next)) = chars.get(i + 1).copied() {
                if next == '\n' {
                    *line_no += 1;
                }
                segment.push(next_offset, next);
            }
            i += 2;
            continue;
        }
        if ch == '\n' {
            if !triple {
                return i;
            }
            *line_no += 1;
        }
        if ch == quote {
            let closes = !triple
                || (chars.get(i + 1).map(|(_, c)| *c) == Some(quote)
                    && chars.get(i + 2).map(|(_, c)| *c) == Some(quote));
            if closes {
                for _ in 0..width {
                    segment.push(chars[i].0, quote);
                    i += 1;
                }
                return i;
            }
        }
        segment.push(offset, ch);
        i += 1;
    }
    i
}

fn first_word(code: &str) -> &str {
    let end = code
        .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .unwrap_or(code.len());
    &code[..end]
}

fn is_compound_header(code: &str) -> bool {
    code.starts_with('@')
        || matches!(
            first_word(code),
            "if" | "for" | "while" | "with" | "def" | "class" | "try" | "async"
        )
}

fn is_clause(code: &str) -> bool {
    matches!(first_word(code), "else" | "elif" | "except" | "finally")
}

/// Top-level statements in source order.
pub fn statements(text: &str) -> Vec<Statement> {
    let mut statements: Vec<Statement> = Vec::new();
    let mut after_decorator = false;

    for line in logical_lines(text) {
        let head = line.head();
        let joins = !statements.is_empty()
            && (line.indent > 0 || is_clause(head) || after_decorator);
        if joins {
            if let Some(last) = statements.last_mut() {
                last.last_line = line.last_line;
                last.end = line.end();
                last.code.push('\n');
                last.code.push_str(&join_segments(&line));
            }
            if line.indent == 0 {
                after_decorator = head.starts_with('@');
            }
            continue;
        }

        after_decorator = head.starts_with('@');
        if is_compound_header(head) {
            statements.push(Statement {
                index: statements.len(),
                first_line: line.first_line,
                last_line: line.last_line,
                end: line.end(),
                code: join_segments(&line),
            });
        } else {
            for segment in &line.segments {
                statements.push(Statement {
                    index: statements.len(),
                    first_line: line.first_line,
                    last_line: line.last_line,
                    end: segment.end,
                    code: segment.code.clone(),
                });
            }
        }
    }
    statements
}

fn join_segments(line: &LogicalLine) -> String {
    line.segments
        .iter()
        .map(|segment| segment.code.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Source text of statements `0..=last`, cut right after statement `last`.
pub fn prefix_through(text: &str, statements: &[Statement], last: usize) -> Option<String> {
    let statement = statements.get(last)?;
    let mut prefix = text.get(..statement.end)?.to_string();
    prefix.push('\n');
    Some(prefix)
}

/// Top-level package names imported anywhere in `text`, first seen first.
/// Relative imports are skipped.
pub fn imports(text: &str) -> Vec<String> {
    let mut modules: Vec<String> = Vec::new();
    for line in logical_lines(text) {
        for segment in &line.segments {
            for module in segment_imports(&segment.code) {
                if !modules.contains(&module) {
                    modules.push(module);
                }
            }
        }
    }
    modules
}

fn strip_keyword<'a>(code: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = code.strip_prefix(keyword)?;
    rest.starts_with(char::is_whitespace).then_some(rest)
}

/// Text after the header colon of a one-line compound statement, e.g.
/// `import yaml` in `try: import yaml`.
fn inline_body(code: &str) -> Option<&str> {
    if !(is_compound_header(code) || is_clause(code)) {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = code.char_indices().peekable();
    while let Some((offset, ch)) = chars.next() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 && chars.peek().map(|(_, next)| *next) != Some('=') => {
                let body = code[offset + 1..].trim();
                return (!body.is_empty()).then_some(body);
            }
            _ => {}
        }
    }
    None
}

fn segment_imports(code: &str) -> Vec<String> {
    if let Some(body) = inline_body(code) {
        return segment_imports(body);
    }
    if let Some(rest) = strip_keyword(code, "import") {
        return rest
            .split(',')
            .filter_map(|item| item.split_whitespace().next())
            .map(|name| name.trim_matches(|ch| ch == '(' || ch == ')'))
            .filter_map(base_module)
            .collect();
    }
    if let Some(rest) = strip_keyword(code, "from") {
        let mut words = rest.split_whitespace();
        let (Some(module), Some("import")) = (words.next(), words.next()) else {
            return Vec::new();
        };
        return base_module(module).into_iter().collect();
    }
    Vec::new()
}

fn base_module(dotted: &str) -> Option<String> {
    if dotted.starts_with('.') {
        return None;
    }
    let base = dotted.split('.').next()?;
    let valid = base
        .chars()
        .next()
        .is_some_and(|ch| ch.is_alphabetic() || ch == '_')
        && base.chars().all(|ch| ch.is_alphanumeric() || ch == '_');
    valid.then(|| base.to_string())
}
