//! Constraint DDL requests and the parser for the DDL this crate emits.
//!
//! Only the `ALTER TABLE ... ADD CONSTRAINT` and `ALTER DOMAIN ... ADD
//! CONSTRAINT` forms produced by
//! [`ConstraintBehavior::create_sql_without_indexes`](crate::constraint::ConstraintBehavior::create_sql_without_indexes)
//! are understood.

use std::fmt;

use crate::constraint::{MatchMode, ReferentialAction};
use crate::expr::lexer::Token;
use crate::expr::parser::Parser;
use crate::expr::{Expression, ParseError};

/// A possibly schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    pub schema: Option<String>,
    pub name: String,
}

impl ObjectName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Schema, falling back to `default`.
    pub fn schema_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for ObjectName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ObjectName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// What a constraint is attached to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintTarget {
    Table(ObjectName),
    Domain(ObjectName),
}

/// The constraint being declared.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintSpec {
    Check {
        expression: Expression,
    },
    PrimaryKey {
        columns: Vec<String>,
    },
    Unique {
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        ref_table: ObjectName,
        /// Omitted columns mean the referenced table's primary key.
        ref_columns: Option<Vec<String>>,
        /// Omitted match mode means the configured default.
        match_mode: Option<MatchMode>,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    },
}

/// A request to add one constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRequest {
    pub target: ConstraintTarget,
    /// Generated when absent.
    pub name: Option<ObjectName>,
    pub spec: ConstraintSpec,
    /// Validate rows already stored; `NOCHECK` turns this off.
    pub validate_existing: bool,
}

impl ConstraintRequest {
    fn table(table: &str, spec: ConstraintSpec) -> Self {
        Self {
            target: ConstraintTarget::Table(ObjectName::new(table)),
            name: None,
            spec,
            validate_existing: true,
        }
    }

    /// `CHECK(expression)` on a table.
    pub fn check(table: &str, expression: Expression) -> Self {
        Self::table(table, ConstraintSpec::Check { expression })
    }

    pub fn primary_key(table: &str, columns: &[&str]) -> Self {
        Self::table(
            table,
            ConstraintSpec::PrimaryKey {
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        )
    }

    pub fn unique(table: &str, columns: &[&str]) -> Self {
        Self::table(
            table,
            ConstraintSpec::Unique {
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        )
    }

    /// A foreign key; pass no `ref_columns` to reference the primary key.
    pub fn foreign_key(table: &str, columns: &[&str], ref_table: &str, ref_columns: &[&str]) -> Self {
        Self::table(
            table,
            ConstraintSpec::ForeignKey {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                ref_table: ObjectName::new(ref_table),
                ref_columns: (!ref_columns.is_empty())
                    .then(|| ref_columns.iter().map(|c| c.to_string()).collect()),
                match_mode: None,
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            },
        )
    }

    /// `CHECK(expression)` on a domain.
    pub fn domain_check(domain: &str, expression: Expression) -> Self {
        Self {
            target: ConstraintTarget::Domain(ObjectName::new(domain)),
            name: None,
            spec: ConstraintSpec::Check { expression },
            validate_existing: true,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(ObjectName::new(name));
        self
    }

    /// Qualify the target and constraint name with `schema`.
    pub fn in_schema(mut self, schema: &str) -> Self {
        match &mut self.target {
            ConstraintTarget::Table(name) | ConstraintTarget::Domain(name) => {
                name.schema = Some(schema.to_string())
            }
        }
        if let Some(name) = &mut self.name {
            name.schema = Some(schema.to_string());
        }
        if let ConstraintSpec::ForeignKey { ref_table, .. } = &mut self.spec {
            if ref_table.schema.is_none() {
                ref_table.schema = Some(schema.to_string());
            }
        }
        self
    }

    pub fn with_match(mut self, mode: MatchMode) -> Self {
        if let ConstraintSpec::ForeignKey { match_mode, .. } = &mut self.spec {
            *match_mode = Some(mode);
        }
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let ConstraintSpec::ForeignKey { on_delete, .. } = &mut self.spec {
            *on_delete = action;
        }
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        if let ConstraintSpec::ForeignKey { on_update, .. } = &mut self.spec {
            *on_update = action;
        }
        self
    }

    /// Skip validation of existing rows.
    pub fn without_validation(mut self) -> Self {
        self.validate_existing = false;
        self
    }
}

fn object_name(parser: &mut Parser) -> Result<ObjectName, ParseError> {
    let (schema, name) = parser.qualified_identifier()?;
    Ok(ObjectName { schema, name })
}

fn parenthesized_expression(parser: &mut Parser) -> Result<Expression, ParseError> {
    parser.expect(&Token::LParen)?;
    let expression = parser.parse_expression()?;
    parser.expect(&Token::RParen)?;
    Ok(expression)
}

fn referential_action(parser: &mut Parser) -> Result<ReferentialAction, ParseError> {
    if parser.eat_keyword("CASCADE") {
        Ok(ReferentialAction::Cascade)
    } else if parser.eat_keyword("RESTRICT") {
        Ok(ReferentialAction::Restrict)
    } else if parser.eat_keyword("NO") {
        parser.expect_keyword("ACTION")?;
        Ok(ReferentialAction::NoAction)
    } else if parser.eat_keyword("SET") {
        if parser.eat_keyword("NULL") {
            Ok(ReferentialAction::SetNull)
        } else {
            parser.expect_keyword("DEFAULT")?;
            Ok(ReferentialAction::SetDefault)
        }
    } else {
        Err(parser.error("expected referential action"))
    }
}

fn foreign_key(parser: &mut Parser) -> Result<ConstraintSpec, ParseError> {
    let columns = parser.identifier_list()?;
    parser.expect_keyword("REFERENCES")?;
    let ref_table = object_name(parser)?;
    let ref_columns = if parser.peek() == Some(&Token::LParen) {
        Some(parser.identifier_list()?)
    } else {
        None
    };

    let match_mode = if parser.eat_keyword("MATCH") {
        if parser.eat_keyword("FULL") {
            Some(MatchMode::Full)
        } else {
            parser.expect_keyword("SIMPLE")?;
            Some(MatchMode::Simple)
        }
    } else {
        None
    };

    let mut on_delete = ReferentialAction::NoAction;
    let mut on_update = ReferentialAction::NoAction;
    while parser.eat_keyword("ON") {
        if parser.eat_keyword("DELETE") {
            on_delete = referential_action(parser)?;
        } else {
            parser.expect_keyword("UPDATE")?;
            on_update = referential_action(parser)?;
        }
    }

    Ok(ConstraintSpec::ForeignKey {
        columns,
        ref_table,
        ref_columns,
        match_mode,
        on_delete,
        on_update,
    })
}

/// Parse one `ALTER TABLE`/`ALTER DOMAIN ... ADD CONSTRAINT` statement.
pub fn parse_constraint_sql(sql: &str) -> Result<ConstraintRequest, ParseError> {
    let mut parser = Parser::new(sql)?;
    parser.expect_keyword("ALTER")?;
    let domain = if parser.eat_keyword("DOMAIN") {
        true
    } else {
        parser.expect_keyword("TABLE")?;
        false
    };
    let target_name = object_name(&mut parser)?;
    parser.expect_keyword("ADD")?;
    let name = if parser.eat_keyword("CONSTRAINT") {
        Some(object_name(&mut parser)?)
    } else {
        None
    };

    let spec = if parser.eat_keyword("CHECK") {
        ConstraintSpec::Check {
            expression: parenthesized_expression(&mut parser)?,
        }
    } else if domain {
        return Err(parser.error("expected CHECK"));
    } else if parser.eat_keyword("PRIMARY") {
        parser.expect_keyword("KEY")?;
        ConstraintSpec::PrimaryKey {
            columns: parser.identifier_list()?,
        }
    } else if parser.eat_keyword("UNIQUE") {
        ConstraintSpec::Unique {
            columns: parser.identifier_list()?,
        }
    } else if parser.eat_keyword("FOREIGN") {
        parser.expect_keyword("KEY")?;
        foreign_key(&mut parser)?
    } else {
        return Err(parser.error("expected CHECK, PRIMARY KEY, UNIQUE or FOREIGN KEY"));
    };

    let validate_existing = !parser.eat_keyword("NOCHECK");
    if validate_existing {
        parser.eat_keyword("CHECK");
    }
    parser.expect_end()?;

    let target = if domain {
        ConstraintTarget::Domain(target_name)
    } else {
        ConstraintTarget::Table(target_name)
    };
    Ok(ConstraintRequest {
        target,
        name,
        spec,
        validate_existing,
    })
}
