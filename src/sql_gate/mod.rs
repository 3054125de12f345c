use std::ops::ControlFlow;

use sqlparser::ast::{ObjectName, ObjectType, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{AppError, AppResult};
use crate::models::{ChangeSetItem, ChangeTag};

const AUTH_SCHEMA: &str = "auth";

/// Classifies a (possibly multi-statement) SQL script into a deduplicated
/// set of change descriptors (section 4.8). Never throws: a statement the
/// parser can't handle simply contributes nothing, and a script that fails
/// to parse at all yields an empty list.
pub fn analyze_query(sql: &str) -> Vec<ChangeSetItem> {
    let Ok(statements) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for statement in &statements {
        if let Some(item) = classify(statement) {
            if !items.contains(&item) {
                items.push(item);
            }
        }
    }
    items
}

/// Rejects `DELETE`/`TRUNCATE`/`DROP` statements whose target relation is
/// explicitly schema-qualified to `auth` (case-insensitive). Unqualified
/// names default to the public schema and are always permitted (section
/// 4.8).
pub fn check_auth_schema_operations(sql: &str) -> AppResult<()> {
    let Ok(statements) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        // A statement this gate can't even parse can't be proven safe, but
        // only the three listed operations are policed here — parse
        // failure is left to whatever executes the SQL next.
        return Ok(());
    };

    for statement in &statements {
        let targets_auth = match statement {
            Statement::Delete { .. } | Statement::Truncate { .. } => relations_of(statement)
                .iter()
                .any(|name| schema_of(name).is_some_and(|s| s.eq_ignore_ascii_case(AUTH_SCHEMA))),
            Statement::Drop { names, .. } => names
                .iter()
                .any(|name| schema_of(name).is_some_and(|s| s.eq_ignore_ascii_case(AUTH_SCHEMA))),
            _ => false,
        };

        if targets_auth {
            return Err(AppError::Forbidden(
                "Operation targets the auth schema and is not permitted".into(),
            ));
        }
    }

    Ok(())
}

/// Segments a semicolon-delimited script into discrete statement texts,
/// respecting single/double-quoted string literals (with `''`/`""` escaping),
/// line comments (`--`) and block comments (`/* ... */`) so semicolons
/// inside any of those never end a statement early.
pub fn split_statements(script: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum State {
        Normal,
        SingleQuoted,
        DoubleQuoted,
        LineComment,
        BlockComment,
    }

    let chars: Vec<char> = script.chars().collect();
    let mut state = State::Normal;
    let mut current = String::new();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            State::Normal => match c {
                '\'' => {
                    state = State::SingleQuoted;
                    current.push(c);
                }
                '"' => {
                    state = State::DoubleQuoted;
                    current.push(c);
                }
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    current.push(c);
                    current.push('-');
                    i += 1;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    current.push(c);
                    current.push('*');
                    i += 1;
                }
                ';' => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        out.push(trimmed.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
            State::SingleQuoted => {
                current.push(c);
                if c == '\'' {
                    // `''` is an escaped quote, not the closing delimiter.
                    if next == Some('\'') {
                        current.push('\'');
                        i += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                current.push(c);
                if c == '"' {
                    if next == Some('"') {
                        current.push('"');
                        i += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                current.push(c);
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                current.push(c);
                if c == '*' && next == Some('/') {
                    current.push('/');
                    i += 1;
                    state = State::Normal;
                }
            }
        }

        i += 1;
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

fn classify(statement: &Statement) -> Option<ChangeSetItem> {
    match statement {
        Statement::Insert(_) | Statement::Update { .. } | Statement::Delete { .. } => {
            let name = relations_of(statement).first().map(object_name_string);
            Some(ChangeSetItem {
                tag: ChangeTag::Records,
                name,
            })
        }
        Statement::CreateTable(_) => Some(ChangeSetItem {
            tag: ChangeTag::Tables,
            name: None,
        }),
        Statement::AlterTable { name, .. } => Some(ChangeSetItem {
            tag: ChangeTag::Table,
            name: Some(object_name_string(name)),
        }),
        Statement::CreateIndex { .. } => Some(ChangeSetItem {
            tag: ChangeTag::Index,
            name: None,
        }),
        Statement::CreateTrigger { .. } | Statement::DropTrigger { .. } => Some(ChangeSetItem {
            tag: ChangeTag::Trigger,
            name: None,
        }),
        Statement::CreatePolicy { .. } | Statement::AlterPolicy { .. } | Statement::DropPolicy { .. } => {
            Some(ChangeSetItem {
                tag: ChangeTag::Policy,
                name: None,
            })
        }
        Statement::CreateFunction { .. } | Statement::DropFunction { .. } => Some(ChangeSetItem {
            tag: ChangeTag::Function,
            name: None,
        }),
        Statement::CreateExtension { .. } => Some(ChangeSetItem {
            tag: ChangeTag::Extension,
            name: None,
        }),
        Statement::Drop {
            object_type, names, ..
        } => match object_type {
            ObjectType::Table => Some(ChangeSetItem {
                tag: ChangeTag::Tables,
                name: None,
            }),
            ObjectType::Index => Some(ChangeSetItem {
                tag: ChangeTag::Index,
                name: None,
            }),
            other if format!("{other:?}") == "Extension" => Some(ChangeSetItem {
                tag: ChangeTag::Extension,
                name: None,
            }),
            _ => {
                let _ = names;
                None
            }
        },
        // SELECT (and CTEs terminating in SELECT) are explicitly ignored.
        Statement::Query(_) => None,
        _ => None,
    }
}

/// Collects every relation (table/view) name touched anywhere in a
/// statement via sqlparser's AST visitor, rather than hand-matching each
/// statement variant's internal field layout.
fn relations_of(statement: &Statement) -> Vec<ObjectName> {
    use sqlparser::ast::Visit;
    use sqlparser::ast::Visitor;

    struct RelationCollector(Vec<ObjectName>);

    impl Visitor for RelationCollector {
        type Break = ();

        fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
            self.0.push(relation.clone());
            ControlFlow::Continue(())
        }
    }

    let mut collector = RelationCollector(Vec::new());
    let _ = statement.visit(&mut collector);
    collector.0
}

fn object_name_string(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}

/// The schema qualifier of a two-or-more-part object name (e.g. `auth` in
/// `auth.users`), or `None` for an unqualified (public-schema) name.
fn schema_of(name: &ObjectName) -> Option<String> {
    if name.0.len() >= 2 {
        Some(name.0[name.0.len() - 2].value.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_query_classifies_inserts_and_alter() {
        let items = analyze_query(
            "INSERT INTO users VALUES(1); INSERT INTO users VALUES(2); ALTER TABLE users ADD COLUMN x TEXT",
        );
        assert_eq!(
            items,
            vec![
                ChangeSetItem {
                    tag: ChangeTag::Records,
                    name: Some("users".into()),
                },
                ChangeSetItem {
                    tag: ChangeTag::Table,
                    name: Some("users".into()),
                },
            ]
        );
    }

    #[test]
    fn analyze_query_dedups_by_tag_and_name_preserving_first_seen_order() {
        let items = analyze_query("INSERT INTO a VALUES(1); UPDATE a SET x=1; DELETE FROM a");
        assert_eq!(
            items,
            vec![ChangeSetItem {
                tag: ChangeTag::Records,
                name: Some("a".into()),
            }]
        );
    }

    #[test]
    fn analyze_query_ignores_select() {
        assert!(analyze_query("SELECT * FROM users").is_empty());
    }

    #[test]
    fn analyze_query_is_idempotent_under_repetition() {
        let once = analyze_query("INSERT INTO a VALUES(1)");
        let twice = analyze_query("INSERT INTO a VALUES(1); INSERT INTO a VALUES(1)");
        assert_eq!(once, twice);
    }

    #[test]
    fn analyze_query_returns_empty_on_parse_failure() {
        assert!(analyze_query("NOT EVEN SQL ((((").is_empty());
    }

    #[test]
    fn create_and_drop_table_tagged_tables_without_name() {
        let items = analyze_query("CREATE TABLE foo (id INT)");
        assert_eq!(
            items,
            vec![ChangeSetItem {
                tag: ChangeTag::Tables,
                name: None,
            }]
        );

        let items = analyze_query("DROP TABLE foo");
        assert_eq!(
            items,
            vec![ChangeSetItem {
                tag: ChangeTag::Tables,
                name: None,
            }]
        );
    }

    #[test]
    fn create_and_drop_extension_tagged_extension() {
        let items = analyze_query("CREATE EXTENSION pgcrypto");
        assert_eq!(
            items,
            vec![ChangeSetItem {
                tag: ChangeTag::Extension,
                name: None,
            }]
        );

        let items = analyze_query("DROP EXTENSION pgcrypto");
        assert_eq!(
            items,
            vec![ChangeSetItem {
                tag: ChangeTag::Extension,
                name: None,
            }]
        );
    }

    #[test]
    fn check_auth_schema_rejects_qualified_drop() {
        assert!(check_auth_schema_operations("DROP TABLE auth.users").is_err());
    }

    #[test]
    fn check_auth_schema_allows_unqualified_drop() {
        assert!(check_auth_schema_operations("DROP TABLE users").is_ok());
    }

    #[test]
    fn check_auth_schema_is_case_insensitive() {
        assert!(check_auth_schema_operations("DROP TABLE AUTH.users").is_err());
        assert!(check_auth_schema_operations("drop table Auth.Users").is_err());
    }

    #[test]
    fn check_auth_schema_rejects_delete_and_truncate() {
        assert!(check_auth_schema_operations("DELETE FROM auth.users").is_err());
        assert!(check_auth_schema_operations("TRUNCATE auth.users").is_err());
    }

    #[test]
    fn check_auth_schema_allows_other_schema_writes() {
        assert!(check_auth_schema_operations("DELETE FROM public.widgets").is_ok());
        assert!(check_auth_schema_operations("DROP TABLE realtime.messages").is_ok());
    }

    #[test]
    fn split_statements_respects_semicolons_inside_string_literals() {
        let stmts = split_statements("INSERT INTO t VALUES ('a;b'); SELECT 1");
        assert_eq!(stmts, vec!["INSERT INTO t VALUES ('a;b')", "SELECT 1"]);
    }

    #[test]
    fn split_statements_respects_escaped_single_quotes() {
        let stmts = split_statements("INSERT INTO t VALUES ('it''s; fine')");
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("it''s; fine"));
    }

    #[test]
    fn split_statements_ignores_semicolons_in_line_comments() {
        let stmts = split_statements("SELECT 1; -- comment with a ; in it\nSELECT 2");
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn split_statements_ignores_semicolons_in_block_comments() {
        let stmts = split_statements("SELECT 1; /* a ; b */ SELECT 2;");
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn split_statements_skips_empty_segments() {
        let stmts = split_statements("SELECT 1;;  ; SELECT 2;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }
}
