//! Schema Registry Tests
//!
//! Contract immutability, version conflict detection and startup
//! loading from definition files.

use finflow_etl::db;
use finflow_etl::models::SchemaContract;
use finflow_etl::registry::SchemaRegistry;

const CONTRACT_V1: &str = r#"
    domain = "base_clientes"
    version = 1
    business_key = ["cidade"]

    [[fields]]
    name = "cidade"
    type = "string"
    normalize = true
    rules = [{ rule = "non_empty" }]
"#;

async fn test_registry() -> SchemaRegistry {
    let pool = finflow_common::db::memory_pool().await.unwrap();
    db::init_tables(&pool).await.unwrap();
    SchemaRegistry::new(pool)
}

/// TC-REG-001: register then get round-trips the contract
#[tokio::test]
async fn tc_reg_001_register_and_get() {
    // Given: an empty registry
    let registry = test_registry().await;
    let contract = SchemaContract::from_toml(CONTRACT_V1).unwrap();

    // When: a contract is registered
    registry.register(&contract).await.unwrap();

    // Then: get returns an identical definition
    let fetched = registry.get("base_clientes", 1).await.unwrap();
    assert_eq!(fetched.domain, "base_clientes");
    assert_eq!(fetched.version, 1);
    assert_eq!(fetched.business_key, vec!["cidade"]);
}

/// TC-REG-002: re-registering an existing version fails with
/// RegistryConflict - contracts are immutable once registered
#[tokio::test]
async fn tc_reg_002_duplicate_version_conflicts() {
    // Given: a registered contract
    let registry = test_registry().await;
    let contract = SchemaContract::from_toml(CONTRACT_V1).unwrap();
    registry.register(&contract).await.unwrap();

    // When: the same (domain, version) is registered again
    let result = registry.register(&contract).await;

    // Then: RegistryConflict
    assert!(matches!(
        result,
        Err(finflow_common::Error::RegistryConflict { version: 1, .. })
    ));
}

/// TC-REG-003: a new version registers alongside the old one
#[tokio::test]
async fn tc_reg_003_version_bump_registers() {
    let registry = test_registry().await;
    let v1 = SchemaContract::from_toml(CONTRACT_V1).unwrap();
    registry.register(&v1).await.unwrap();

    let mut v2 = v1.clone();
    v2.version = 2;
    registry.register(&v2).await.unwrap();

    assert_eq!(registry.versions("base_clientes").await.unwrap(), vec![1, 2]);
}

/// TC-REG-004: unknown contract versions are NotFound
#[tokio::test]
async fn tc_reg_004_missing_contract_not_found() {
    let registry = test_registry().await;
    let result = registry.get("dre_lancamentos", 7).await;
    assert!(matches!(result, Err(finflow_common::Error::NotFound(_))));
}

/// TC-REG-005: directory loading registers new files and stays
/// idempotent across restarts
#[tokio::test]
async fn tc_reg_005_directory_load_idempotent() {
    // Given: a contracts directory with one definition file
    let registry = test_registry().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("base_clientes_v1.toml"), CONTRACT_V1).unwrap();

    // When: loaded twice (two startups)
    let first = registry.load_directory(dir.path()).await.unwrap();
    let second = registry.load_directory(dir.path()).await.unwrap();

    // Then: registered exactly once, second pass is a no-op
    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert!(registry.get("base_clientes", 1).await.is_ok());
}
