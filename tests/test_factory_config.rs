use std::io::Write;

use sql_access_layer::prelude::*;

const SETTINGS: &str = r#"{
  "Logging": { "LogLevel": { "Default": "Information" } },
  "ConnectionStrings": {
    "Orders": "Server=tcp:sql01,1433;Database=orders;User Id=app;Password=s3cret;TrustServerCertificate=true",
    "Orders:ProviderName": "System.Data.SqlClient",
    "Reports": { "ConnectionString": "Host=pg01;Port=5433;Database=reports;Username=rpt;Password=x", "ProviderName": "Npgsql" },
    "Shop": { "ConnectionString": "Server=my01;Port=3307;Database=shop;Uid=web;Pwd=x", "ProviderName": "MySqlClient" },
    "Legacy": { "ConnectionString": "Data Source=legacy.db", "ProviderName": "System.Data.SQLite" },
    "Orphan": "Host=pg02;Database=nothing"
  }
}"#;

fn settings_file() -> Result<(tempfile::TempDir, std::path::PathBuf), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("appsettings.json");
    let mut file = std::fs::File::create(&path)?;
    file.write_all(SETTINGS.as_bytes())?;
    Ok((dir, path))
}

#[test]
fn resolves_every_configured_provider() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, path) = settings_file()?;
    let settings = AppSettings::load(&path)?;

    let expected = [
        ("Orders", ProviderIdentity::SqlServer),
        ("reports", ProviderIdentity::PostgreSql),
        ("SHOP", ProviderIdentity::MySql),
    ];
    for (name, provider) in expected {
        let (adapter, resolved) = ProviderFactory::resolve(name, &settings)?;
        assert_eq!(resolved, provider, "{name}");
        assert_eq!(adapter.provider(), provider, "{name}");
    }
    Ok(())
}

#[test]
fn unsupported_and_incomplete_entries_fail() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, path) = settings_file()?;
    let settings = AppSettings::load(&path)?;

    let err = ProviderFactory::resolve("Legacy", &settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);
    assert!(err.to_string().contains("System.Data.SQLite"), "{err}");

    let err = ProviderFactory::resolve("Orphan", &settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = AccessManager::new("Nowhere", &settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn manager_binds_parameters_for_its_provider() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, path) = settings_file()?;
    let settings = AppSettings::load(&path)?;
    let db = AccessManager::new("Shop", &settings)?;
    assert_eq!(db.provider(), ProviderIdentity::MySql);

    let json = db.create_parameter(
        "@doc",
        serde_json::json!({ "sku": "A-1" }),
        MySqlType::Json,
        ParameterDirection::Input,
    )?;
    assert_eq!(json.name(), "doc");

    let err = db
        .create_parameter(
            "@doc",
            "{}",
            PostgresType::Jsonb,
            ParameterDirection::Input,
        )
        .unwrap_err();
    match err {
        SqlAccessError::UnsupportedProvider {
            provider,
            requested,
        } => {
            assert_eq!(provider, "mysqlclient");
            assert_eq!(requested.as_deref(), Some("PostgresType::Jsonb"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn environment_source_resolves_like_settings() -> Result<(), Box<dyn std::error::Error>> {
    let source = EnvConfigSource::from_vars([
        ("ConnectionStrings__Main", "postgres://app@localhost:5432/app"),
        ("ConnectionStrings__Main__ProviderName", "postgresql"),
    ]);
    let db = AccessManager::new("main", &source)?;
    assert_eq!(db.provider(), ProviderIdentity::PostgreSql);
    assert_eq!(db.config().name, "main");

    // formatting a config never leaks the connection string
    let rendered = format!("{:?}", db.config());
    assert!(!rendered.contains("localhost"), "{rendered}");
    Ok(())
}

#[test]
fn builder_rejects_duplicate_names_in_one_command() {
    let builder = ParameterBuilder::new(ProviderIdentity::SqlServer);
    let specs = CommandSpec::text("SELECT @id")
        .param("@id", 1_i64)
        .param("ID", 2_i64)
        .parameters;
    let err = builder.build_all(&specs).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
}
