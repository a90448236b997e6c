//! Integration tests for constraint DDL, index ownership and persistence.

use pretty_assertions::assert_eq;
use rowguard_core::{
    Column, ConstraintBehavior, ConstraintError, ConstraintRequest, ConstraintType, DataType,
    Database, Domain, DropBehavior, EnforcementConfig, Error, Expression, MatchMode,
    QualifiedName, ReferentialAction, Session, StorageConfig, Table, Value,
};

struct TestContext {
    db: Database,
    session: Session,
    dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_config(EnforcementConfig::default())
    }

    fn with_config(config: EnforcementConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(StorageConfig::new(dir.path()), config).unwrap();
        let session = db.session();
        Self { db, session, dir }
    }

    fn add(&self, request: ConstraintRequest) {
        self.db.add_constraint(&self.session, request).unwrap();
    }

    fn insert(&self, table: &str, values: Vec<Value>) -> Result<(), Error> {
        self.db.insert(&self.session, table, values).map(|_| ())
    }
}

fn quantity() -> Domain {
    Domain::new("PUBLIC", "QUANTITY", DataType::Int)
}

fn create_tables(db: &Database) {
    db.create_domain(quantity()).unwrap();
    db.create_table(
        Table::new("PUBLIC", "CUSTOMERS")
            .with_column(Column::new("ID", DataType::Int))
            .with_column(Column::new("EMAIL", DataType::Text)),
    )
    .unwrap();
    db.create_table(
        Table::new("PUBLIC", "ORDERS")
            .with_column(Column::new("ID", DataType::Int))
            .with_column(Column::new("CUSTOMER_ID", DataType::Int))
            .with_column(Column::with_domain("QTY", &quantity())),
    )
    .unwrap();
}

fn add_constraints(ctx: &TestContext) {
    ctx.add(ConstraintRequest::primary_key("CUSTOMERS", &["ID"]).named("PK_CUSTOMERS"));
    ctx.add(ConstraintRequest::unique("CUSTOMERS", &["EMAIL"]).named("UQ_EMAIL"));
    ctx.add(ConstraintRequest::primary_key("ORDERS", &["ID"]).named("PK_ORDERS"));
    ctx.add(
        ConstraintRequest::foreign_key("ORDERS", &["CUSTOMER_ID"], "CUSTOMERS", &[])
            .named("FK_ORDERS_CUSTOMER")
            .with_match(MatchMode::Full)
            .on_delete(ReferentialAction::Cascade),
    );
    ctx.add(
        ConstraintRequest::check("ORDERS", Expression::parse("ID > 0 AND QTY < 1000").unwrap())
            .named("CK_ORDERS"),
    );
    ctx.add(
        ConstraintRequest::domain_check("QUANTITY", Expression::parse("VALUE >= 0").unwrap())
            .named("CK_QUANTITY"),
    );
}

#[test]
fn test_constraint_sql_round_trip() {
    let source = TestContext::new();
    create_tables(&source.db);
    add_constraints(&source);
    let sql = source.db.constraint_sql();

    assert_eq!(sql.len(), 6);
    assert!(sql.iter().all(|s| !s.contains("INDEX")));
    assert!(sql.last().unwrap().contains("FOREIGN KEY"));
    assert_eq!(
        sql[0],
        r#"ALTER TABLE "PUBLIC"."CUSTOMERS" ADD CONSTRAINT "PUBLIC"."PK_CUSTOMERS" PRIMARY KEY("ID")"#
    );
    assert_eq!(
        sql[5],
        r#"ALTER TABLE "PUBLIC"."ORDERS" ADD CONSTRAINT "PUBLIC"."FK_ORDERS_CUSTOMER" FOREIGN KEY("CUSTOMER_ID") REFERENCES "PUBLIC"."CUSTOMERS"("ID") MATCH FULL ON DELETE CASCADE NOCHECK"#
    );

    let target = TestContext::new();
    create_tables(&target.db);
    for statement in &sql {
        target.db.execute_constraint_sql(&target.session, statement).unwrap();
    }
    assert_eq!(target.db.constraint_sql(), sql);

    let catalog = target.db.catalog();
    let orders = catalog.table_by_name("PUBLIC", "ORDERS").unwrap();
    let customers = catalog.table_by_name("PUBLIC", "CUSTOMERS").unwrap();
    let pk = catalog.primary_key(customers.id).unwrap();
    let fk = catalog
        .constraints_for(orders.id)
        .into_iter()
        .find_map(|c| c.as_referential())
        .unwrap();
    assert_eq!(fk.referenced_constraint(), Some(pk.id()));
    assert_eq!(catalog.referencers(pk.id()), vec![fk.id()]);
}

#[test]
fn test_round_trip_keeps_enforcement() {
    let ctx = TestContext::new();
    create_tables(&ctx.db);
    for statement in [
        r#"ALTER TABLE CUSTOMERS ADD CONSTRAINT PK_CUSTOMERS PRIMARY KEY("ID")"#,
        "ALTER TABLE ORDERS ADD FOREIGN KEY(CUSTOMER_ID) REFERENCES CUSTOMERS",
        "ALTER DOMAIN QUANTITY ADD CHECK(VALUE >= 0)",
    ] {
        ctx.db.execute_constraint_sql(&ctx.session, statement).unwrap();
    }

    ctx.insert("CUSTOMERS", vec![1.into(), Value::Null]).unwrap();
    ctx.insert("ORDERS", vec![1.into(), 1.into(), 2.into()]).unwrap();
    assert!(ctx.insert("ORDERS", vec![2.into(), 7.into(), 2.into()]).is_err());
    assert!(ctx.insert("ORDERS", vec![3.into(), 1.into(), (-2).into()]).is_err());

    let names: Vec<String> = ctx
        .db
        .catalog()
        .constraints()
        .map(|c| c.name().name.clone())
        .collect();
    assert_eq!(names, vec!["PK_CUSTOMERS", "CONSTRAINT_2", "CONSTRAINT_3"]);
}

#[test]
fn test_index_ownership_transfer() {
    let ctx = TestContext::new();
    ctx.db
        .create_table(Table::new("PUBLIC", "ITEMS").with_column(Column::new("CODE", DataType::Text)))
        .unwrap();

    ctx.add(ConstraintRequest::unique("ITEMS", &["CODE"]).named("UQ1"));
    ctx.add(ConstraintRequest::unique("ITEMS", &["CODE"]).named("UQ2"));
    let indexes = ctx.db.indexes("ITEMS").unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].name, "UQ1_INDEX");

    {
        let catalog = ctx.db.catalog();
        assert_eq!(catalog.index_holders(indexes[0].id).len(), 2);
        let owner = catalog.index_owner(indexes[0].id).unwrap();
        assert_eq!(catalog.constraint(owner).unwrap().name().name, "UQ1");
    }

    ctx.db.drop_constraint("UQ1").unwrap();
    assert_eq!(ctx.db.indexes("ITEMS").unwrap().len(), 1);
    {
        let catalog = ctx.db.catalog();
        let owner = catalog.index_owner(indexes[0].id).unwrap();
        assert_eq!(catalog.constraint(owner).unwrap().name().name, "UQ2");
    }

    // Still enforced through the inherited index.
    ctx.insert("ITEMS", vec!["A".into()]).unwrap();
    assert!(ctx.insert("ITEMS", vec!["A".into()]).is_err());

    ctx.db.drop_constraint("UQ2").unwrap();
    assert!(ctx.db.indexes("ITEMS").unwrap().is_empty());
    ctx.insert("ITEMS", vec!["A".into()]).unwrap();
}

#[test]
fn test_existing_index_is_reused_not_owned() {
    let ctx = TestContext::new();
    ctx.db
        .create_table(Table::new("PUBLIC", "ITEMS").with_column(Column::new("CODE", DataType::Text)))
        .unwrap();
    ctx.db
        .create_index(&ctx.session, "ITEMS", "IDX_CODE", &["CODE"], true)
        .unwrap();
    ctx.add(ConstraintRequest::unique("ITEMS", &["CODE"]).named("UQ_CODE"));

    let err = ctx.db.drop_index("ITEMS", "IDX_CODE").unwrap_err();
    assert!(matches!(err, Error::ConstraintInUse { .. }));

    ctx.db.drop_constraint("UQ_CODE").unwrap();
    let indexes = ctx.db.indexes("ITEMS").unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].name, "IDX_CODE");
    ctx.db.drop_index("ITEMS", "IDX_CODE").unwrap();
}

#[test]
fn test_drop_restrict() {
    let ctx = TestContext::new();
    create_tables(&ctx.db);
    add_constraints(&ctx);

    let err = ctx.db.drop_constraint("PK_CUSTOMERS").unwrap_err();
    match err {
        Error::ConstraintInUse {
            constraint,
            referenced_by,
        } => {
            assert_eq!(constraint, "PUBLIC.PK_CUSTOMERS");
            assert_eq!(referenced_by, "PUBLIC.FK_ORDERS_CUSTOMER");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let err = ctx.db.drop_table("CUSTOMERS").unwrap_err();
    assert!(matches!(err, Error::ConstraintInUse { .. }));

    ctx.db.drop_constraint("FK_ORDERS_CUSTOMER").unwrap();
    ctx.db.drop_constraint("PK_CUSTOMERS").unwrap();
    assert!(ctx.db.catalog().constraint_by_name(&QualifiedName::new("PUBLIC", "PK_CUSTOMERS")).is_none());
}

#[test]
fn test_drop_cascade() {
    let ctx = TestContext::with_config(
        EnforcementConfig::from_json_str(r#"{"drop_behavior": "cascade"}"#).unwrap(),
    );
    assert_eq!(ctx.db.config().drop_behavior, DropBehavior::Cascade);
    create_tables(&ctx.db);
    add_constraints(&ctx);
    ctx.insert("CUSTOMERS", vec![1.into(), "a@x".into()]).unwrap();
    ctx.insert("ORDERS", vec![1.into(), 1.into(), 1.into()]).unwrap();

    ctx.db.drop_table("CUSTOMERS").unwrap();
    assert!(matches!(
        ctx.db.count("CUSTOMERS").unwrap_err(),
        Error::NotFound { kind: "table", .. }
    ));

    let remaining: Vec<ConstraintType> = ctx
        .db
        .catalog()
        .constraints()
        .map(|c| c.constraint_type())
        .collect();
    assert_eq!(
        remaining,
        vec![ConstraintType::PrimaryKey, ConstraintType::Check, ConstraintType::Domain]
    );

    // The foreign key went with the table.
    ctx.insert("ORDERS", vec![2.into(), 99.into(), 1.into()]).unwrap();
    let err = ctx.insert("ORDERS", vec![3.into(), 99.into(), (-1).into()]).unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(ConstraintError::CheckViolation { .. })
    ));
}

#[test]
fn test_catalog_survives_reopen() {
    let ctx = TestContext::new();
    create_tables(&ctx.db);
    add_constraints(&ctx);
    ctx.insert("CUSTOMERS", vec![1.into(), "a@x".into()]).unwrap();
    ctx.insert("ORDERS", vec![1.into(), 1.into(), 5.into()]).unwrap();
    ctx.db.flush().unwrap();

    let version = ctx.db.catalog_version();
    let sql = ctx.db.constraint_sql();
    let TestContext { db, dir, .. } = ctx;
    drop(db);

    let db = Database::open(StorageConfig::new(dir.path()), EnforcementConfig::default()).unwrap();
    let session = db.session();
    assert_eq!(db.catalog_version(), version);
    assert_eq!(db.constraint_sql(), sql);

    let err = db
        .insert(&session, "CUSTOMERS", vec![2.into(), "a@x".into()])
        .unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(ConstraintError::UniqueViolation { .. })
    ));
    assert!(db
        .insert(&session, "ORDERS", vec![2.into(), 5.into(), 1.into()])
        .is_err());
    db.insert(&session, "ORDERS", vec![2.into(), 1.into(), 1.into()])
        .unwrap();
    assert_eq!(db.count("ORDERS").unwrap(), 2);
}

#[test]
fn test_constraint_names_are_schema_scoped() {
    let ctx = TestContext::new();
    create_tables(&ctx.db);
    ctx.add(ConstraintRequest::unique("CUSTOMERS", &["EMAIL"]).named("UQ_EMAIL"));

    let err = ctx
        .db
        .add_constraint(
            &ctx.session,
            ConstraintRequest::unique("ORDERS", &["ID"]).named("UQ_EMAIL"),
        )
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));

    let err = ctx
        .db
        .add_constraint(
            &ctx.session,
            ConstraintRequest::unique("ORDERS", &["ID"]).named("UQ_ID").in_schema("OTHER"),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "table", .. }));

    let err = ctx
        .db
        .add_constraint(
            &ctx.session,
            ConstraintRequest::foreign_key("ORDERS", &["CUSTOMER_ID"], "CUSTOMERS", &[]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Definition(_)));
    assert!(ctx.db.indexes("ORDERS").unwrap().is_empty());
}

#[test]
fn test_rejected_ddl_leaves_catalog_unchanged() {
    let ctx = TestContext::new();
    create_tables(&ctx.db);
    ctx.insert("CUSTOMERS", vec![1.into(), "a@example.com".into()]).unwrap();
    ctx.insert("CUSTOMERS", vec![2.into(), "a@example.com".into()]).unwrap();
    let version = ctx.db.catalog_version();

    let err = ctx
        .db
        .add_constraint(&ctx.session, ConstraintRequest::unique("CUSTOMERS", &["EMAIL"]))
        .unwrap_err();
    assert!(err.is_violation());
    assert_eq!(ctx.db.catalog_version(), version);
    assert_eq!(ctx.db.catalog().constraints().count(), 0);
    assert!(ctx.db.indexes("CUSTOMERS").unwrap().is_empty());

    let err = ctx
        .db
        .rename_column("CUSTOMERS", "ID", "EMAIL")
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
    assert_eq!(ctx.db.catalog_version(), version);

    let id = ctx
        .db
        .add_constraint(&ctx.session, ConstraintRequest::primary_key("CUSTOMERS", &["ID"]))
        .unwrap();
    let catalog = ctx.db.catalog();
    assert_eq!(catalog.constraint(id).unwrap().name().name, "CONSTRAINT_1");
}

#[test]
fn test_rename_column_to_same_name() {
    let ctx = TestContext::new();
    create_tables(&ctx.db);
    add_constraints(&ctx);
    let before = ctx.db.constraint_sql();

    ctx.db.rename_column("CUSTOMERS", "EMAIL", "EMAIL").unwrap();
    assert_eq!(ctx.db.constraint_sql(), before);
    assert!(ctx.insert("CUSTOMERS", vec![1.into(), "a@example.com".into()]).is_ok());
}
