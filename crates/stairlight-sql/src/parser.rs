//! Table reference extraction over the sqlparser tokenizer
//!
//! References are found by scanning the token stream for `FROM`/`JOIN`
//! clauses and a few statement heads, without building an AST. Token
//! positions give the exact line of every identifier.

use serde::Serialize;
use sqlparser::dialect::{BigQueryDialect, Dialect};
use sqlparser::keywords::{Keyword, RESERVED_FOR_TABLE_ALIAS};
use sqlparser::tokenizer::{Token, Tokenizer};
use stairlight_core::{Diagnostic, DiagnosticCode, Location, Severity};
use std::collections::HashSet;
use tracing::debug;

/// One occurrence of a table identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReference {
    /// Identifier as written, quotes removed
    pub table: String,

    /// 1-based line of the identifier's first token
    pub line: usize,

    /// Literal text of that line
    pub line_str: String,
}

/// Table written by the statement (`CREATE`, `INSERT`, `MERGE`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableTarget {
    pub table: String,
    pub line: usize,
}

/// References and targets found in one SQL text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSql {
    /// Tables read, in source order, unique per (table, line)
    pub references: Vec<TableReference>,

    /// Tables written, in source order
    pub targets: Vec<TableTarget>,
}

impl ParsedSql {
    /// Distinct referenced identifiers, in first-seen order
    pub fn tables(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.references
            .iter()
            .map(|r| r.table.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }
}

/// SQL that yields no references; the run continues
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseWarning {
    #[error("Failed to tokenize SQL: {message}")]
    Tokenize { message: String },

    #[error("Unbalanced parentheses at line {line}")]
    UnbalancedParentheses { line: usize },

    #[error("No recognizable SELECT, CREATE ... AS SELECT or MERGE statement")]
    UnrecognizedStatement,
}

impl ParseWarning {
    pub fn to_diagnostic(&self, key: &str, uri: &str) -> Diagnostic {
        let location = match self {
            ParseWarning::UnbalancedParentheses { line } => Location::with_line(key, *line),
            _ => Location::new(key),
        };
        Diagnostic::new(DiagnosticCode::SqlParseWarning, Severity::Warn, self.to_string())
            .with_location(location.and_uri(uri))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Word {
        value: String,
        quoted: bool,
        keyword: Keyword,
    },
    Number(String),
    Period,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Minus,
    Star,
    Other,
}

#[derive(Debug, Clone)]
struct Lex {
    lexeme: Lexeme,
    line: usize,
    /// Whitespace or a comment precedes this token
    spaced: bool,
}

/// Functions whose arguments may contain a `FROM` keyword
const FROM_IN_ARGUMENTS: &[&str] = &["EXTRACT", "SUBSTRING", "SUBSTR", "TRIM", "POSITION", "OVERLAY"];

#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    /// `FROM` directly inside this parenthesis is an argument keyword
    from_is_argument: bool,
    /// The parenthesis is a subquery in a `FROM` list
    from_item: bool,
    /// A `FROM` clause is open at this depth; a comma starts another item
    in_from: bool,
}

/// Extracts table references from rendered SQL
pub struct ReferenceParser {
    dialect: Box<dyn Dialect + Send + Sync>,
}

impl ReferenceParser {
    /// Parser for BigQuery SQL (backtick identifiers, `#` comments)
    pub fn new() -> Self {
        Self {
            dialect: Box::new(BigQueryDialect {}),
        }
    }

    /// Extract references and targets
    ///
    /// Returns a warning (and no references) when the text cannot be
    /// tokenized, has unbalanced parentheses or contains no recognizable
    /// statement.
    pub fn parse(&self, sql: &str) -> Result<ParsedSql, ParseWarning> {
        let lexes = self.lex(sql)?;
        check_balance(&lexes)?;

        let recognizable = lexes
            .iter()
            .any(|lex| is_keyword(&lex.lexeme, Keyword::SELECT) || is_keyword(&lex.lexeme, Keyword::MERGE));
        if !recognizable {
            debug!("no SELECT or MERGE among {} token(s)", lexes.len());
            return Err(ParseWarning::UnrecognizedStatement);
        }

        let lines: Vec<&str> = sql.lines().collect();
        let scanner = Scanner::new(&lexes);
        let (found, targets) = scanner.scan();

        let mut seen = HashSet::new();
        let references = found
            .into_iter()
            .filter(|(table, line)| seen.insert((table.clone(), *line)))
            .map(|(table, line)| TableReference {
                line_str: lines.get(line.saturating_sub(1)).copied().unwrap_or_default().to_string(),
                table,
                line,
            })
            .collect();

        Ok(ParsedSql { references, targets })
    }

    fn lex(&self, sql: &str) -> Result<Vec<Lex>, ParseWarning> {
        let tokens = Tokenizer::new(self.dialect.as_ref(), sql)
            .tokenize_with_location()
            .map_err(|e| ParseWarning::Tokenize { message: e.to_string() })?;

        let mut lexes = Vec::with_capacity(tokens.len());
        let mut spaced = false;

        for token in tokens {
            let line = token.span.start.line as usize;
            let lexeme = match token.token {
                Token::Whitespace(_) => {
                    spaced = true;
                    continue;
                }
                Token::EOF => break,
                Token::Word(word) => Lexeme::Word {
                    value: word.value,
                    quoted: word.quote_style.is_some(),
                    keyword: word.keyword,
                },
                // `my-project-123.dataset` tokenizes the digits as `123.`
                Token::Number(value, _) if value.ends_with('.') => {
                    lexes.push(Lex {
                        lexeme: Lexeme::Number(value.trim_end_matches('.').to_string()),
                        line,
                        spaced,
                    });
                    lexes.push(Lex {
                        lexeme: Lexeme::Period,
                        line,
                        spaced: false,
                    });
                    spaced = false;
                    continue;
                }
                Token::Number(value, _) => Lexeme::Number(value),
                Token::Period => Lexeme::Period,
                Token::Comma => Lexeme::Comma,
                Token::LParen => Lexeme::LParen,
                Token::RParen => Lexeme::RParen,
                Token::LBracket => Lexeme::LBracket,
                Token::RBracket => Lexeme::RBracket,
                Token::SemiColon => Lexeme::Semicolon,
                Token::Minus => Lexeme::Minus,
                Token::Mul => Lexeme::Star,
                _ => Lexeme::Other,
            };
            lexes.push(Lex { lexeme, line, spaced });
            spaced = false;
        }

        Ok(lexes)
    }
}

impl Default for ReferenceParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_keyword(lexeme: &Lexeme, expected: Keyword) -> bool {
    matches!(lexeme, Lexeme::Word { quoted: false, keyword, .. } if *keyword == expected)
}

fn check_balance(lexes: &[Lex]) -> Result<(), ParseWarning> {
    let mut open_lines = Vec::new();
    for lex in lexes {
        match lex.lexeme {
            Lexeme::LParen => open_lines.push(lex.line),
            Lexeme::RParen => {
                if open_lines.pop().is_none() {
                    return Err(ParseWarning::UnbalancedParentheses { line: lex.line });
                }
            }
            _ => {}
        }
    }
    match open_lines.pop() {
        Some(line) => Err(ParseWarning::UnbalancedParentheses { line }),
        None => Ok(()),
    }
}

struct Scanner<'a> {
    lexes: &'a [Lex],
    ctes: Vec<String>,
}

impl<'a> Scanner<'a> {
    fn new(lexes: &'a [Lex]) -> Self {
        let mut scanner = Self {
            lexes,
            ctes: Vec::new(),
        };
        scanner.ctes = scanner.cte_names();
        scanner
    }

    fn lexeme(&self, i: usize) -> Option<&'a Lexeme> {
        self.lexes.get(i).map(|lex| &lex.lexeme)
    }

    fn is(&self, i: usize, expected: Keyword) -> bool {
        self.lexeme(i).is_some_and(|l| is_keyword(l, expected))
    }

    fn is_lexeme(&self, i: usize, expected: &Lexeme) -> bool {
        self.lexeme(i) == Some(expected)
    }

    fn tight(&self, i: usize) -> bool {
        self.lexes.get(i).is_some_and(|lex| !lex.spaced)
    }

    /// Index just past the parenthesis group opening at `i`
    fn skip_group(&self, i: usize) -> usize {
        let mut depth = 0usize;
        for (offset, lex) in self.lexes[i..].iter().enumerate() {
            match lex.lexeme {
                Lexeme::LParen => depth += 1,
                Lexeme::RParen => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return i + offset + 1;
                    }
                }
                _ => {}
            }
        }
        self.lexes.len()
    }

    /// Names introduced by `WITH name [(cols)] AS (`
    fn cte_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for i in 0..self.lexes.len() {
            let opens = self.is(i, Keyword::WITH)
                || self.is(i, Keyword::RECURSIVE)
                || self.is_lexeme(i, &Lexeme::Comma);
            if !opens {
                continue;
            }
            let Some(Lexeme::Word { value, .. }) = self.lexeme(i + 1) else {
                continue;
            };
            let mut j = i + 2;
            if self.is_lexeme(j, &Lexeme::LParen) {
                j = self.skip_group(j);
            }
            if self.is(j, Keyword::AS) && self.is_lexeme(j + 1, &Lexeme::LParen) {
                names.push(value.clone());
            }
        }
        names
    }

    fn is_cte(&self, table: &str) -> bool {
        !table.contains('.') && self.ctes.iter().any(|cte| cte.eq_ignore_ascii_case(table))
    }

    /// One dotted-name segment, joining hyphenated project names
    fn read_segment(&self, i: usize) -> Option<(String, usize)> {
        let Some(Lexeme::Word { value, quoted, .. }) = self.lexeme(i) else {
            return None;
        };
        let mut segment = value.clone();
        let mut j = i + 1;
        if !quoted {
            while self.is_lexeme(j, &Lexeme::Minus) && self.tight(j) && self.tight(j + 1) {
                match self.lexeme(j + 1) {
                    Some(Lexeme::Word { value, quoted: false, .. }) | Some(Lexeme::Number(value)) => {
                        segment.push('-');
                        segment.push_str(value);
                        j += 2;
                    }
                    _ => break,
                }
            }
        }
        Some((segment, j))
    }

    /// Table name starting at `i`: (identifier, line, next index)
    ///
    /// A name followed by `(` is a table function unless `call_allowed`.
    fn read_name(&self, i: usize, call_allowed: bool) -> Option<(String, usize, usize)> {
        let lex = self.lexes.get(i)?;
        if let Lexeme::Word { quoted: false, keyword, .. } = &lex.lexeme {
            if matches!(keyword, Keyword::UNNEST | Keyword::LATERAL | Keyword::SELECT)
                || RESERVED_FOR_TABLE_ALIAS.contains(keyword)
            {
                return None;
            }
        }

        let (first, mut j) = self.read_segment(i)?;
        let mut segments = vec![first];
        while self.is_lexeme(j, &Lexeme::Period) {
            match self.read_segment(j + 1) {
                Some((segment, next)) => {
                    segments.push(segment);
                    j = next;
                }
                None => break,
            }
        }
        // BigQuery wildcard tables: `dataset.events_*`
        if self.is_lexeme(j, &Lexeme::Star) && self.tight(j) {
            if let Some(last) = segments.last_mut() {
                last.push('*');
            }
            j += 1;
        }
        if !call_allowed && self.is_lexeme(j, &Lexeme::LParen) {
            return None;
        }

        let name = segments
            .iter()
            .flat_map(|segment| segment.split('.'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(".");
        if name.is_empty() {
            return None;
        }
        Some((name, lex.line, j))
    }

    /// Skip `[AS] alias` after a table
    fn skip_alias(&self, i: usize) -> usize {
        match self.lexeme(i) {
            Some(Lexeme::Word { quoted: false, keyword: Keyword::AS, .. }) => match self.lexeme(i + 1) {
                Some(Lexeme::Word { .. }) => i + 2,
                _ => i + 1,
            },
            Some(Lexeme::Word { quoted: true, .. }) => i + 1,
            Some(Lexeme::Word { keyword, .. }) if !is_alias_stop(*keyword) => i + 1,
            _ => i,
        }
    }

    /// Tables of a `FROM` list starting at `start`
    fn read_from_list(
        &self,
        start: usize,
        frames: &mut Vec<Frame>,
        found: &mut Vec<(String, usize)>,
    ) -> usize {
        if let Some(frame) = frames.last_mut() {
            frame.in_from = true;
        }
        let mut j = start;
        loop {
            if self.is_lexeme(j, &Lexeme::LParen) {
                frames.push(Frame {
                    from_item: true,
                    ..Frame::default()
                });
                return j + 1;
            }
            let Some((name, line, next)) = self.read_name(j, false) else {
                return j;
            };
            if !self.is_cte(&name) {
                found.push((name, line));
            }
            j = self.skip_alias(next);
            if !self.is_lexeme(j, &Lexeme::Comma) {
                return j;
            }
            j += 1;
        }
    }

    /// `CREATE [OR REPLACE] [TEMP] [MATERIALIZED] TABLE|VIEW [IF NOT EXISTS] name`
    fn read_create_target(&self, i: usize) -> Option<(String, usize, usize)> {
        let mut j = i + 1;
        if self.is(j, Keyword::OR) && self.is(j + 1, Keyword::REPLACE) {
            j += 2;
        }
        if self.is(j, Keyword::TEMP) || self.is(j, Keyword::TEMPORARY) {
            j += 1;
        }
        if self.is(j, Keyword::MATERIALIZED) {
            j += 1;
        }
        if !(self.is(j, Keyword::TABLE) || self.is(j, Keyword::VIEW)) {
            return None;
        }
        j += 1;
        if self.is(j, Keyword::IF) && self.is(j + 1, Keyword::NOT) && self.is(j + 2, Keyword::EXISTS) {
            j += 3;
        }
        self.read_name(j, true)
    }

    /// `INSERT [INTO] name` and `MERGE [INTO] name`
    fn read_into_target(&self, i: usize) -> Option<(String, usize, usize)> {
        let j = if self.is(i + 1, Keyword::INTO) { i + 2 } else { i + 1 };
        self.read_name(j, true)
    }

    fn scan(&self) -> (Vec<(String, usize)>, Vec<TableTarget>) {
        let mut found = Vec::new();
        let mut targets = Vec::new();
        let mut frames: Vec<Frame> = vec![Frame::default()];
        let mut brackets = 0usize;
        let mut in_merge = false;
        let mut i = 0;

        while i < self.lexes.len() {
            let lexeme = &self.lexes[i].lexeme;

            if is_keyword(lexeme, Keyword::FROM) {
                let argument = frames.last().is_some_and(|f| f.from_is_argument);
                let distinct_from = i > 0 && self.is(i - 1, Keyword::DISTINCT);
                if !argument && !distinct_from {
                    i = self.read_from_list(i + 1, &mut frames, &mut found);
                    continue;
                }
            } else if is_keyword(lexeme, Keyword::JOIN) {
                if let Some(frame) = frames.last_mut() {
                    frame.in_from = true;
                }
                if let Some((name, line, next)) = self.read_name(i + 1, false) {
                    if !self.is_cte(&name) {
                        found.push((name, line));
                    }
                    i = self.skip_alias(next);
                    continue;
                }
            } else if is_keyword(lexeme, Keyword::USING) && in_merge {
                if let Some((name, line, next)) = self.read_name(i + 1, false) {
                    if !self.is_cte(&name) {
                        found.push((name, line));
                    }
                    i = self.skip_alias(next);
                    continue;
                }
            } else if is_keyword(lexeme, Keyword::CREATE) {
                if let Some((table, line, next)) = self.read_create_target(i) {
                    targets.push(TableTarget { table, line });
                    i = next;
                    continue;
                }
            } else if is_keyword(lexeme, Keyword::INSERT) || is_keyword(lexeme, Keyword::MERGE) {
                in_merge = is_keyword(lexeme, Keyword::MERGE);
                if let Some((table, line, next)) = self.read_into_target(i) {
                    targets.push(TableTarget { table, line });
                    i = next;
                    continue;
                }
            } else if *lexeme == Lexeme::LParen {
                let from_is_argument = i > 0
                    && matches!(
                        self.lexeme(i - 1),
                        Some(Lexeme::Word { value, quoted: false, .. })
                            if FROM_IN_ARGUMENTS.iter().any(|f| value.eq_ignore_ascii_case(f))
                    );
                frames.push(Frame {
                    from_is_argument,
                    ..Frame::default()
                });
            } else if *lexeme == Lexeme::RParen {
                if frames.len() > 1 && frames.pop().is_some_and(|frame| frame.from_item) {
                    let j = self.skip_alias(i + 1);
                    if self.is_lexeme(j, &Lexeme::Comma) {
                        i = self.read_from_list(j + 1, &mut frames, &mut found);
                        continue;
                    }
                }
            } else if *lexeme == Lexeme::LBracket {
                brackets += 1;
            } else if *lexeme == Lexeme::RBracket {
                brackets = brackets.saturating_sub(1);
            } else if *lexeme == Lexeme::Comma {
                // `FROM a JOIN b ON ..., c` and `FROM a TABLESAMPLE ..., c`
                if brackets == 0 && frames.last().is_some_and(|f| f.in_from) {
                    i = self.read_from_list(i + 1, &mut frames, &mut found);
                    continue;
                }
            } else if *lexeme == Lexeme::Semicolon || ends_from_clause(lexeme) {
                if let Some(frame) = frames.last_mut() {
                    frame.in_from = false;
                }
            }

            i += 1;
        }

        (found, targets)
    }
}

/// Clause keywords after which a comma no longer separates `FROM` items
fn ends_from_clause(lexeme: &Lexeme) -> bool {
    matches!(
        lexeme,
        Lexeme::Word { quoted: false, keyword, .. } if matches!(
            keyword,
            Keyword::WHERE
                | Keyword::GROUP
                | Keyword::HAVING
                | Keyword::QUALIFY
                | Keyword::WINDOW
                | Keyword::ORDER
                | Keyword::LIMIT
                | Keyword::UNION
                | Keyword::EXCEPT
                | Keyword::INTERSECT
                | Keyword::SELECT
                | Keyword::SET
                | Keyword::WHEN
                | Keyword::VALUES
                | Keyword::RETURNING
        )
    )
}

fn is_alias_stop(keyword: Keyword) -> bool {
    RESERVED_FOR_TABLE_ALIAS.contains(&keyword)
        || matches!(
            keyword,
            Keyword::FOR | Keyword::WHEN | Keyword::TABLESAMPLE | Keyword::WINDOW | Keyword::QUALIFY
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tables(sql: &str) -> Vec<String> {
        ReferenceParser::new()
            .parse(sql)
            .unwrap()
            .references
            .into_iter()
            .map(|r| r.table)
            .collect()
    }

    #[test]
    fn parse_simple_select() {
        let parsed = ReferenceParser::new()
            .parse("SELECT * FROM proj.ds.upstream WHERE 1 = 1")
            .unwrap();

        assert_eq!(
            parsed.references,
            vec![TableReference {
                table: "proj.ds.upstream".to_string(),
                line: 1,
                line_str: "SELECT * FROM proj.ds.upstream WHERE 1 = 1".to_string(),
            }]
        );
        assert!(parsed.targets.is_empty());
    }

    #[test]
    fn parse_from_list_and_joins() {
        let sql = "SELECT *\nFROM p.d.a AS x, p.d.b y\nINNER JOIN p.d.c ON y.id = x.id\nLEFT OUTER JOIN `p.d.d` z USING (id)";
        assert_eq!(tables(sql), vec!["p.d.a", "p.d.b", "p.d.c", "p.d.d"]);
    }

    #[test]
    fn comma_items_after_join_conditions() {
        let on = "SELECT * FROM p.d.a JOIN p.d.b ON a.id = b.id, p.d.c WHERE c.x IN (1, 2)";
        assert_eq!(tables(on), vec!["p.d.a", "p.d.b", "p.d.c"]);

        let using = "SELECT *\nFROM p.d.a\nLEFT JOIN p.d.b USING (id, day), p.d.c, p.d.d\nGROUP BY 1, 2";
        assert_eq!(tables(using), vec!["p.d.a", "p.d.b", "p.d.c", "p.d.d"]);

        let arrays = "SELECT * FROM p.d.a JOIN p.d.b ON b.pair = [a.x, a.y]";
        assert_eq!(tables(arrays), vec!["p.d.a", "p.d.b"]);
    }

    #[test]
    fn comma_items_after_tablesample() {
        let sql = "SELECT * FROM p.d.a AS x TABLESAMPLE SYSTEM (10 PERCENT), p.d.b ORDER BY x.id, 1";
        assert_eq!(tables(sql), vec!["p.d.a", "p.d.b"]);
    }

    #[test]
    fn reports_identifier_line_in_multiline_statements() {
        let sql = "SELECT\n  a\nFROM\n  p.d.a\nJOIN\n  p.d.b\n  ON a.id = b.id";
        let parsed = ReferenceParser::new().parse(sql).unwrap();
        let lines: Vec<(usize, &str)> = parsed
            .references
            .iter()
            .map(|r| (r.line, r.line_str.as_str()))
            .collect();
        assert_eq!(lines, vec![(4, "  p.d.a"), (6, "  p.d.b")]);
    }

    #[test]
    fn skips_ctes_and_finds_their_sources() {
        let sql = "WITH a AS (\n  SELECT * FROM p.d.src_a\n), b (x) AS (SELECT * FROM p.d.src_b)\nSELECT * FROM a JOIN b ON a.x = b.x";
        assert_eq!(tables(sql), vec!["p.d.src_a", "p.d.src_b"]);
    }

    #[test]
    fn nested_subqueries() {
        let sql = "SELECT * FROM (SELECT * FROM (SELECT id FROM p.d.inner_t) t1) t2, p.d.after_sub";
        assert_eq!(tables(sql), vec!["p.d.inner_t", "p.d.after_sub"]);
    }

    #[test]
    fn comments_never_yield_references() {
        let with_comment = "SELECT *\n-- FROM p.d.commented\nFROM p.d.a\n/* JOIN p.d.block */\n# FROM p.d.hash\n";
        let without = "SELECT *\nFROM p.d.a\n";
        assert_eq!(tables(with_comment), tables(without));
    }

    #[test]
    fn ignores_unnest_and_function_arguments() {
        let sql = "SELECT EXTRACT(YEAR FROM ts), SUBSTRING(s FROM 2), TRIM(BOTH 'x' FROM s)\n\
                   FROM p.d.events, UNNEST(items) AS item\n\
                   WHERE a IS DISTINCT FROM b";
        assert_eq!(tables(sql), vec!["p.d.events"]);
    }

    #[test]
    fn joins_hyphenated_and_backticked_names() {
        let sql = "SELECT * FROM my-project-123.ds.t JOIN `other-proj`.ds.`u` ON TRUE";
        assert_eq!(tables(sql), vec!["my-project-123.ds.t", "other-proj.ds.u"]);
    }

    #[test]
    fn wildcard_tables() {
        assert_eq!(tables("SELECT * FROM p.d.events_* WHERE _TABLE_SUFFIX > '1'"), vec!["p.d.events_*"]);
    }

    #[test]
    fn create_statements_record_targets() {
        let sql = "CREATE OR REPLACE TABLE p.d.out AS\nSELECT * FROM p.d.in";
        let parsed = ReferenceParser::new().parse(sql).unwrap();
        assert_eq!(parsed.targets, vec![TableTarget { table: "p.d.out".to_string(), line: 1 }]);
        assert_eq!(parsed.tables(), vec!["p.d.in"]);

        let view = ReferenceParser::new()
            .parse("CREATE VIEW IF NOT EXISTS p.d.v AS SELECT * FROM p.d.in")
            .unwrap();
        assert_eq!(view.targets[0].table, "p.d.v");
    }

    #[test]
    fn merge_reads_target_and_source() {
        let sql = "MERGE INTO p.d.t T\nUSING p.d.t_staging S\nON T.id = S.id\nWHEN MATCHED THEN UPDATE SET v = S.v";
        let parsed = ReferenceParser::new().parse(sql).unwrap();
        assert_eq!(parsed.targets[0].table, "p.d.t");
        assert_eq!(parsed.tables(), vec!["p.d.t_staging"]);
    }

    #[test]
    fn duplicates_kept_per_line() {
        let sql = "SELECT * FROM p.d.a\nUNION ALL\nSELECT * FROM p.d.a JOIN p.d.a ON TRUE";
        let lines: Vec<usize> = ReferenceParser::new()
            .parse(sql)
            .unwrap()
            .references
            .iter()
            .map(|r| r.line)
            .collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn malformed_sql_is_a_warning() {
        let parser = ReferenceParser::new();
        assert_eq!(
            parser.parse("SELECT * FROM (p.d.a"),
            Err(ParseWarning::UnbalancedParentheses { line: 1 })
        );
        assert_eq!(
            parser.parse("DELETE p.d.a WHERE TRUE"),
            Err(ParseWarning::UnrecognizedStatement)
        );
        assert!(matches!(parser.parse("SELECT 'unterminated"), Err(ParseWarning::Tokenize { .. })));

        let diag = ParseWarning::UnbalancedParentheses { line: 3 }.to_diagnostic("a.sql", "/abs/a.sql");
        assert_eq!(diag.code, DiagnosticCode::SqlParseWarning);
        assert_eq!(diag.location.and_then(|l| l.line), Some(3));
    }
}
