use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use super::Record;
use crate::errors::{SearchError, SearchResult};
use crate::reader::Line;

static INSERT_INTO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:insert|replace)(?:\s+(?:ignore|low_priority|delayed))?\s+into\b")
        .expect("valid INSERT pattern")
});

/// Longest value tuple kept before it is rejected as malformed
const MAX_TUPLE_LEN: usize = 1 << 20;

/// Statement text between `INSERT INTO` and `VALUES`
#[derive(Debug)]
struct Header {
    line: usize,
    text: String,
    word_start: Option<usize>,
    quote: Option<char>,
    depth: usize,
}

/// A value tuple being collected, parentheses included
#[derive(Debug)]
struct Tuple {
    line: usize,
    text: String,
    quote: Option<char>,
    escaped: bool,
    depth: usize,
}

#[derive(Debug)]
enum State {
    Idle,
    Header(Header),
    ExpectTuple { statement_line: usize },
    Tuple(Tuple),
    AfterTuple,
    /// Discarding input up to the next `;` outside quotes
    Skip { quote: Option<char>, escaped: bool },
}

/// One record per value tuple of every `INSERT ... VALUES` statement
pub struct SqlRecords<I> {
    path: Arc<Path>,
    lines: I,
    state: State,
    labels: Option<Arc<[String]>>,
    pending: VecDeque<SearchResult<Record>>,
    finished: bool,
}

impl<I> SqlRecords<I> {
    pub fn new(path: Arc<Path>, lines: I) -> Self {
        Self {
            path,
            lines,
            state: State::Idle,
            labels: None,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn process_line(&mut self, line: &Line) {
        let text = line.text.as_str();
        let mut pos = 0;

        // An unbalanced quote must not swallow the statements that follow it
        if !matches!(self.state, State::Idle) && starts_statement(text) {
            self.abandon_statement();
        }

        loop {
            if matches!(self.state, State::Idle) {
                let rest = &text[pos..];
                if pos == 0 && is_comment(rest) {
                    return;
                }
                match INSERT_INTO.find(rest) {
                    Some(m) => {
                        pos += m.end();
                        self.state = State::Header(Header {
                            line: line.number,
                            text: String::new(),
                            word_start: None,
                            quote: None,
                            depth: 0,
                        });
                    }
                    None => return,
                }
                continue;
            }

            let Some(c) = text[pos..].chars().next() else {
                break;
            };
            pos += c.len_utf8();
            self.feed(c, line.number);
        }

        // The line break itself is part of any open statement
        self.feed('\n', line.number);
    }

    fn feed(&mut self, c: char, line: usize) {
        let state = std::mem::replace(&mut self.state, State::Idle);
        self.state = self.advance(state, c, line);
    }

    fn advance(&mut self, state: State, c: char, line: usize) -> State {
        match state {
            State::Idle => State::Idle,
            State::Header(header) => self.advance_header(header, c, line),
            State::ExpectTuple { statement_line } => match c {
                '(' => State::Tuple(Tuple {
                    line,
                    text: String::from("("),
                    quote: None,
                    escaped: false,
                    depth: 1,
                }),
                c if c.is_whitespace() => State::ExpectTuple { statement_line },
                ';' => {
                    self.error(line, "expected '(' after VALUES");
                    State::Idle
                }
                _ => {
                    self.error(line, "expected '(' after VALUES");
                    State::Skip {
                        quote: None,
                        escaped: false,
                    }
                }
            },
            State::Tuple(tuple) => self.advance_tuple(tuple, c),
            State::AfterTuple => match c {
                ',' => State::ExpectTuple {
                    statement_line: line,
                },
                ';' => State::Idle,
                c if c.is_whitespace() => State::AfterTuple,
                // Trailing clause such as ON DUPLICATE KEY UPDATE
                _ => State::Skip {
                    quote: None,
                    escaped: false,
                },
            },
            State::Skip { quote, escaped } => {
                let (quote, escaped) = track_quote(quote, escaped, c);
                if quote.is_none() && !escaped && c == ';' {
                    State::Idle
                } else {
                    State::Skip { quote, escaped }
                }
            }
        }
    }

    fn advance_header(&mut self, mut header: Header, c: char, line: usize) -> State {
        if let Some(q) = header.quote {
            header.text.push(c);
            if c == q {
                header.quote = None;
            }
            return State::Header(header);
        }

        if c.is_alphanumeric() || c == '_' {
            header.word_start.get_or_insert(header.text.len());
            header.text.push(c);
            return State::Header(header);
        }

        if let Some(start) = header.word_start.take() {
            let word = &header.text[start..];
            if header.depth == 0
                && (word.eq_ignore_ascii_case("values") || word.eq_ignore_ascii_case("value"))
            {
                self.labels = column_labels(&header.text[..start]);
                let expect = State::ExpectTuple {
                    statement_line: header.line,
                };
                return self.advance(expect, c, line);
            }
        }

        match c {
            '\'' | '"' | '`' => header.quote = Some(c),
            '(' => header.depth += 1,
            ')' => header.depth = header.depth.saturating_sub(1),
            ';' => {
                self.error(header.line, "INSERT statement has no VALUES clause");
                return State::Idle;
            }
            _ => {}
        }
        header.text.push(c);
        State::Header(header)
    }

    fn advance_tuple(&mut self, mut tuple: Tuple, c: char) -> State {
        tuple.text.push(c);
        if tuple.text.len() > MAX_TUPLE_LEN {
            self.error(tuple.line, "value tuple too long");
            return State::Skip {
                quote: None,
                escaped: false,
            };
        }

        if tuple.quote.is_some() || tuple.escaped {
            let (quote, escaped) = track_quote(tuple.quote, tuple.escaped, c);
            tuple.quote = quote;
            tuple.escaped = escaped;
            return State::Tuple(tuple);
        }

        match c {
            '\'' | '"' | '`' => tuple.quote = Some(c),
            '(' => tuple.depth += 1,
            ')' => {
                tuple.depth -= 1;
                if tuple.depth == 0 {
                    self.emit(tuple);
                    return State::AfterTuple;
                }
            }
            _ => {}
        }
        State::Tuple(tuple)
    }

    fn emit(&mut self, tuple: Tuple) {
        let inner = &tuple.text[1..tuple.text.len() - 1];
        let field_values = split_values(inner).into_iter().map(unquote).collect();
        self.pending.push_back(Ok(Record {
            source_path: Arc::clone(&self.path),
            line_number: tuple.line,
            raw_text: tuple.text,
            field_values,
            labels: self.labels.clone(),
        }));
    }

    fn error(&mut self, line: usize, reason: &str) {
        self.pending
            .push_back(Err(SearchError::parse(self.path.to_path_buf(), line, reason)));
    }

    /// Drops the statement in progress, reporting it if a tuple or header was open
    fn abandon_statement(&mut self) {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Tuple(tuple) => self.error(tuple.line, "unterminated value tuple"),
            State::Header(header) => self.error(header.line, "unterminated INSERT statement"),
            State::ExpectTuple { statement_line } => {
                self.error(statement_line, "unterminated INSERT statement")
            }
            State::Idle | State::AfterTuple | State::Skip { .. } => {}
        }
    }
}

impl<I> Iterator for SqlRecords<I>
where
    I: Iterator<Item = SearchResult<Line>>,
{
    type Item = SearchResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }
            match self.lines.next() {
                Some(Ok(line)) => self.process_line(&line),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    self.abandon_statement();
                }
            }
        }
    }
}

fn starts_statement(line: &str) -> bool {
    INSERT_INTO
        .find(line.trim_start())
        .is_some_and(|m| m.start() == 0)
}

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("--") || line.starts_with('#')
}

/// Quote state after consuming `c`. Backslash escapes apply inside `'` and `"`.
fn track_quote(quote: Option<char>, escaped: bool, c: char) -> (Option<char>, bool) {
    match quote {
        _ if escaped => (quote, false),
        Some(q) if c == '\\' && q != '`' => (quote, true),
        Some(q) if c == q => (None, false),
        Some(_) => (quote, false),
        None if matches!(c, '\'' | '"' | '`') => (Some(c), false),
        None => (None, false),
    }
}

/// Splits a tuple body on top-level commas
fn split_values(inner: &str) -> Vec<&str> {
    let mut values = Vec::new();
    let mut quote = None;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        if quote.is_none() && !escaped {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    values.push(&inner[start..i]);
                    start = i + 1;
                    continue;
                }
                _ => {}
            }
        }
        (quote, escaped) = track_quote(quote, escaped, c);
    }
    if !inner.trim().is_empty() || !values.is_empty() {
        values.push(&inner[start..]);
    }
    values
}

/// Decodes a SQL literal. Unquoted values such as numbers and `NULL` are kept verbatim.
fn unquote(value: &str) -> String {
    let value = value.trim();
    let mut chars = value.chars();
    let quote = match (chars.next(), chars.next_back()) {
        (Some(q @ ('\'' | '"')), Some(end)) if end == q && value.len() >= 2 => q,
        _ => return value.to_string(),
    };

    let body = &value[1..value.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            c if c == quote && chars.peek() == Some(&quote) => {
                chars.next();
                out.push(quote);
            }
            c => out.push(c),
        }
    }
    out
}

fn column_labels(header: &str) -> Option<Arc<[String]>> {
    let open = header.find('(')?;
    let close = header.rfind(')')?;
    if close <= open {
        return None;
    }
    let labels: Vec<String> = split_values(&header[open + 1..close])
        .into_iter()
        .map(|c| {
            c.trim()
                .trim_matches(|ch| matches!(ch, '`' | '"' | '[' | ']'))
                .to_string()
        })
        .collect();
    if labels.is_empty() {
        None
    } else {
        Some(Arc::from(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::{lines, path};

    fn records(content: &str) -> Vec<SearchResult<Record>> {
        SqlRecords::new(path("c.sql"), lines(content)).collect()
    }

    fn ok_records(content: &str) -> Vec<Record> {
        records(content).into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_single_tuple() {
        let records = ok_records("INSERT INTO u VALUES (1,'example@mail.eg');\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line_number, 1);
        assert_eq!(records[0].raw_text, "(1,'example@mail.eg')");
        assert_eq!(records[0].field_values, vec!["1", "example@mail.eg"]);
        assert!(records[0].labels.is_none());
    }

    #[test]
    fn test_multi_tuple_statement() {
        let records = ok_records("INSERT INTO t VALUES (1,'a'),(2,'b');");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].raw_text, "(2,'b')");
        assert_eq!(records[1].field_values, vec!["2", "b"]);
        assert!(records.iter().all(|r| r.line_number == 1));
    }

    #[test]
    fn test_statement_spanning_lines() {
        let content = "-- MySQL dump\n\
                       # generated\n\
                       INSERT INTO `users` (`id`, `email`) VALUES\n\
                       (1,'first@mail.eg'),\n\
                       (2,'multi\n\
                       line');\n";
        let records = ok_records(content);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].line_number, 4);
        assert_eq!(records[0].label(1), Some("email"));
        assert_eq!(records[1].line_number, 5);
        assert_eq!(records[1].raw_text, "(2,'multi\nline')");
        assert_eq!(records[1].field_values, vec!["2", "multi\nline"]);
    }

    #[test]
    fn test_literals_decoded() {
        let records =
            ok_records("insert ignore into t values (1, 'O\\'Brien', 'it''s', NULL, 'a;b', 'x)y', \"q\");");
        assert_eq!(
            records[0].field_values,
            vec!["1", "O'Brien", "it's", "NULL", "a;b", "x)y", "q"]
        );
    }

    #[test]
    fn test_keyword_inside_column_list_ignored() {
        let records = ok_records("INSERT INTO kv (`key`, value) VALUES ('k', 'v');");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label(1), Some("value"));
    }

    #[test]
    fn test_several_statements_on_one_line() {
        let records = ok_records("INSERT INTO t VALUES (1);INSERT INTO t VALUES (2);\nCREATE TABLE x (id int);\n");
        let raw: Vec<_> = records.iter().map(|r| r.raw_text.as_str()).collect();
        assert_eq!(raw, vec!["(1)", "(2)"]);
    }

    #[test]
    fn test_malformed_statements_skipped() {
        let content = "INSERT INTO t VALUES oops, (9);\n\
                       INSERT INTO t SELECT * FROM s;\n\
                       INSERT INTO t VALUES (3,'ok');\n";
        let records = records(content);
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], Err(SearchError::Parse { line: 1, .. })));
        assert!(matches!(records[1], Err(SearchError::Parse { line: 2, .. })));

        let record = records[2].as_ref().unwrap();
        assert_eq!(record.line_number, 3);
        assert_eq!(record.field_values, vec!["3", "ok"]);
    }

    #[test]
    fn test_trailing_clause_not_an_error() {
        let content = "INSERT INTO t VALUES (1) ON DUPLICATE KEY UPDATE a=(1);\n\
                       INSERT INTO t VALUES (2);\n";
        let records = ok_records(content);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].line_number, 2);
    }

    #[test]
    fn test_unterminated_tuple_at_eof() {
        let records = records("INSERT INTO t VALUES (1,'a'),\n(2,'b");
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(matches!(records[1], Err(SearchError::Parse { line: 2, .. })));
    }

    #[test]
    fn test_unbalanced_quote_does_not_swallow_later_statements() {
        let content = "INSERT INTO t VALUES (1,'it's');\n\
                       INSERT INTO t VALUES (2,'needle');\n\
                       -- comment\n\
                       INSERT INTO t VALUES (3,'needle'),\n\
                       (4,'needle');\n";
        let records = records(content);
        assert_eq!(records.len(), 4);
        assert!(matches!(records[0], Err(SearchError::Parse { line: 1, .. })));

        let lines: Vec<_> = records[1..]
            .iter()
            .map(|r| r.as_ref().unwrap().line_number)
            .collect();
        assert_eq!(lines, vec![2, 4, 5]);
        assert_eq!(records[1].as_ref().unwrap().field_values, vec!["2", "needle"]);
    }

    #[test]
    fn test_missing_terminator_resyncs_at_next_statement() {
        let content = "INSERT INTO t VALUES (1,'a')\n\
                       INSERT INTO t VALUES (2,'b');\n\
                       INSERT INTO t VALUES oops\n\
                       INSERT INTO t VALUES (3,'c');\n";
        let records = records(content);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].as_ref().unwrap().line_number, 1);
        assert_eq!(records[1].as_ref().unwrap().line_number, 2);
        assert!(matches!(records[2], Err(SearchError::Parse { line: 3, .. })));
        assert_eq!(records[3].as_ref().unwrap().field_values, vec!["3", "c"]);
    }

    #[test]
    fn test_oversized_tuple_rejected() {
        let content = format!(
            "INSERT INTO t VALUES ('{}');\nINSERT INTO t VALUES (2);\n",
            "x".repeat(MAX_TUPLE_LEN)
        );
        let records = records(&content);
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], Err(SearchError::Parse { line: 1, .. })));
        assert_eq!(records[1].as_ref().unwrap().raw_text, "(2)");
    }

    #[test]
    fn test_split_and_unquote() {
        assert_eq!(split_values("1, 'a,b', f(2,3)"), vec!["1", " 'a,b'", " f(2,3)"]);
        assert!(split_values("").is_empty());
        assert_eq!(unquote(" 'tab\\there' "), "tab\there");
        assert_eq!(unquote("'"), "'");
        assert_eq!(unquote("42"), "42");
    }
}
