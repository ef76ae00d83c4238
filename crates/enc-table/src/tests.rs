use std::collections::BTreeMap;
use std::path::PathBuf;

use rusqlite::types::Value as SqlValue;
use tempfile::TempDir;

use crate::{
    BackupManager, ChangeInput, EncError, NodeRegistry, RoleModel, Rows, TableSchema, TableStore,
};

const DESCRIPTOR: &str = "\
Nodes:
  table_name: nodes
  columns:
    fqdn: [TEXT, PRIMARY KEY]
    environment: [TEXT, \"DEFAULT 'production'\"]
    role: [TEXT]
    owner: [TEXT]
";

/// Registry over an in-memory store with backups in a temp dir.
fn registry(role_model: RoleModel) -> (NodeRegistry, TempDir) {
    let dir = TempDir::new().unwrap();
    let schema = TableSchema::from_descriptor_str(DESCRIPTOR).unwrap();
    let registry = NodeRegistry::new(
        schema,
        TableStore::open_memory().unwrap(),
        BackupManager::new(dir.path().join("backups")),
        role_model,
    );
    registry.init().unwrap();
    (registry, dir)
}

fn cmdline(nodes: &[&str], values: &[(&str, &str)]) -> ChangeInput {
    ChangeInput {
        nodes: nodes.iter().map(|n| (*n).to_string()).collect(),
        values: values.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        ..Default::default()
    }
}

fn all_rows(registry: &NodeRegistry) -> Rows {
    registry
        .store()
        .query("SELECT * FROM nodes ORDER BY fqdn", &[])
        .unwrap()
}

fn row_count(registry: &NodeRegistry) -> usize {
    all_rows(registry).rows.len()
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn backup_count(registry: &NodeRegistry) -> usize {
    std::fs::read_dir(registry.backups().dir()).map_or(0, |d| d.count())
}

// -----------------------------------------------------------------------
// Schema lifecycle
// -----------------------------------------------------------------------
#[test]
fn test_recreate_yields_empty_table_with_original_columns() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["a.example.com"], &[("role", "web")])).unwrap();

    registry.store().drop_table(registry.schema()).unwrap();
    assert!(!registry.store().table_exists("nodes").unwrap());
    registry.store().create_table(registry.schema()).unwrap();

    assert_eq!(row_count(&registry), 0);
    let cols = registry
        .store()
        .query("SELECT name FROM pragma_table_info('nodes')", &[])
        .unwrap();
    let names: Vec<SqlValue> = cols.rows.into_iter().flatten().collect();
    assert_eq!(names, vec![text("fqdn"), text("environment"), text("role"), text("owner")]);
}

#[test]
fn test_init_takes_snapshot() {
    let (registry, _dir) = registry(RoleModel::Module);
    let path = registry.init().unwrap();
    assert!(path.is_file());
}

// -----------------------------------------------------------------------
// Input sources are interchangeable
// -----------------------------------------------------------------------
#[test]
fn test_equivalent_sources_produce_same_rows() {
    let files = TempDir::new().unwrap();
    let yaml = files.path().join("nodes.yaml");
    std::fs::write(&yaml, "host1.example.com:\n  role: web\n  owner: ops\n").unwrap();
    let csv = files.path().join("nodes.csv");
    std::fs::write(&csv, "fqdn,role,owner\nhost1.example.com,web,ops\n").unwrap();

    let inputs = [
        ChangeInput { structured: Some(yaml), ..Default::default() },
        ChangeInput { tabular: Some(csv), ..Default::default() },
        cmdline(&["host1.example.com"], &[("role", "web"), ("owner", "ops")]),
    ];

    let mut results = Vec::new();
    for input in &inputs {
        let (registry, _dir) = registry(RoleModel::Module);
        registry.add(input).unwrap();
        results.push(all_rows(&registry).rows);
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
    assert_eq!(
        results[0],
        vec![vec![text("host1.example.com"), text("production"), text("web"), text("ops")]]
    );
}

// -----------------------------------------------------------------------
// add
// -----------------------------------------------------------------------
#[test]
fn test_add_then_lookup_module_role() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["host1.example.com"], &[("role", "web")])).unwrap();

    let enc = registry.lookup(&["host1.example.com".to_string()]).unwrap();
    assert_eq!(enc.classes, Some(vec!["role::web".to_string()]));
    assert_eq!(enc.environment.as_deref(), Some("production"));
    assert_eq!(enc.parameters["enc_hostname"], "host1.example.com");
}

#[test]
fn test_add_bare_node_from_primary_key_option() {
    let (registry, _dir) = registry(RoleModel::Module);
    let report = registry.add(&cmdline(&[], &[("fqdn", "bare.example.com")])).unwrap();
    assert_eq!(report.rows_changed, 1);
    assert_eq!(
        all_rows(&registry).rows,
        vec![vec![text("bare.example.com"), text("production"), SqlValue::Null, SqlValue::Null]]
    );
}

#[test]
fn test_add_without_nodes_or_primary_key_is_usage_error() {
    let (registry, _dir) = registry(RoleModel::Module);
    let err = registry.add(&cmdline(&[], &[("role", "web")])).unwrap_err();
    assert!(matches!(err, EncError::Usage(_)));
}

#[test]
fn test_add_nodes_without_values_inserts_nothing() {
    let (registry, _dir) = registry(RoleModel::Module);
    let report = registry.add(&cmdline(&["bare.example.com"], &[])).unwrap();
    assert_eq!(report.statements, 0);
    assert_eq!(report.rows_changed, 0);
    assert_eq!(row_count(&registry), 0);
}

#[test]
fn test_add_duplicate_rolls_back_whole_batch() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["b.example.com"], &[("role", "web")])).unwrap();
    let backups_before = backup_count(&registry);

    let err = registry
        .add(&cmdline(
            &["a.example.com", "b.example.com", "c.example.com"],
            &[("role", "web")],
        ))
        .unwrap_err();
    assert!(matches!(err, EncError::Sqlite(_)));
    assert_eq!(row_count(&registry), 1);
    assert_eq!(backup_count(&registry), backups_before);
}

#[test]
fn test_add_unknown_column_fails_at_execution() {
    let files = TempDir::new().unwrap();
    let yaml = files.path().join("nodes.yaml");
    std::fs::write(&yaml, "a.example.com:\n  colour: red\n").unwrap();
    let (registry, _dir) = registry(RoleModel::Module);
    let err = registry
        .add(&ChangeInput { structured: Some(yaml), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, EncError::Sqlite(_)));
    assert_eq!(row_count(&registry), 0);
}

// -----------------------------------------------------------------------
// change
// -----------------------------------------------------------------------
#[test]
fn test_change_normalizes_environment() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["a.example.com"], &[("role", "web")])).unwrap();
    registry
        .change(&cmdline(&["a.example.com"], &[("environment", "feature/my-branch!")]))
        .unwrap();
    let enc = registry.lookup(&["a.example.com".to_string()]).unwrap();
    assert_eq!(enc.environment.as_deref(), Some("feature_my_branch_"));
}

#[test]
fn test_change_absent_node_is_noop() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["a.example.com"], &[("role", "web")])).unwrap();
    let report = registry
        .change(&cmdline(&["ghost.example.com"], &[("role", "db")]))
        .unwrap();
    assert_eq!(report.rows_changed, 0);
    assert!(report.backup.is_file());
    assert_eq!(row_count(&registry), 1);
}

#[test]
fn test_change_environment_shortcut() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["a.example.com", "b.example.com"], &[("role", "web")])).unwrap();
    registry
        .change_environment(&cmdline(&["a.example.com"], &[("environment", "ignored")]), "topic/x")
        .unwrap();

    let rows = registry.list(&[]).unwrap();
    let envs: BTreeMap<String, SqlValue> = rows
        .iter()
        .map(|r| {
            let SqlValue::Text(fqdn) = r.get("fqdn").cloned().unwrap() else { panic!() };
            (fqdn, r.get("environment").cloned().unwrap())
        })
        .collect();
    assert_eq!(envs["a.example.com"], text("topic_x"));
    assert_eq!(envs["b.example.com"], text("production"));
}

// -----------------------------------------------------------------------
// delete
// -----------------------------------------------------------------------
#[test]
fn test_delete_is_idempotent() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["a.example.com", "b.example.com"], &[("role", "web")])).unwrap();

    let first = registry.delete(&cmdline(&["a.example.com"], &[])).unwrap();
    let after_first = all_rows(&registry).rows;
    let second = registry.delete(&cmdline(&["a.example.com"], &[])).unwrap();

    assert_eq!(first.rows_changed, 1);
    assert_eq!(second.rows_changed, 0);
    assert_eq!(all_rows(&registry).rows, after_first);
}

// -----------------------------------------------------------------------
// list / lookup
// -----------------------------------------------------------------------
#[test]
fn test_list_filters_and_orders() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry
        .add(&cmdline(
            &["host10.example.com", "db.example.com", "host1.example.com"],
            &[("role", "web")],
        ))
        .unwrap();
    let rows = registry.list(&["host1".to_string()]).unwrap();
    let names: Vec<SqlValue> = rows.iter().map(|r| r.get("fqdn").cloned().unwrap()).collect();
    assert_eq!(names, vec![text("host1.example.com"), text("host10.example.com")]);
}

#[test]
fn test_lookup_nonexistent_node() {
    let (registry, _dir) = registry(RoleModel::Module);
    let enc = registry.lookup(&["nonexistent.example.com".to_string()]).unwrap();
    assert_eq!(enc.classes, Some(vec!["role::hostname_not_found".to_string()]));
    assert_eq!(enc.environment, None);
    assert_eq!(enc.parameters.len(), 1);
    assert_eq!(enc.parameters["enc_hostname"], "nonexistent.example.com");
}

// -----------------------------------------------------------------------
// backup / restore
// -----------------------------------------------------------------------
#[test]
fn test_snapshot_restore_round_trip() {
    let (registry, dir) = registry(RoleModel::Module);
    registry
        .add(&cmdline(&["a.example.com", "b.example.com"], &[("role", "web"), ("owner", "o'neil")]))
        .unwrap();
    let before = all_rows(&registry);

    let snapshot = registry.backup().unwrap();
    let kept: PathBuf = dir.path().join("kept.sql.gz");
    std::fs::copy(&snapshot, &kept).unwrap();

    registry.delete(&cmdline(&["a.example.com"], &[])).unwrap();
    registry.add(&cmdline(&["z.example.com"], &[("role", "web")])).unwrap();

    let after_restore = registry.restore(&[kept.display().to_string()]).unwrap();
    assert!(after_restore.is_file());
    let restored = all_rows(&registry);
    assert_eq!(restored.columns, before.columns);
    assert_eq!(restored.rows, before.rows);
}

#[test]
fn test_restore_relative_to_backup_dir() {
    let (registry, _dir) = registry(RoleModel::Module);
    registry.add(&cmdline(&["a.example.com"], &[("role", "web")])).unwrap();
    let snapshot = registry.backup().unwrap();
    let kept = registry.backups().dir().join("kept.sql.gz");
    std::fs::copy(&snapshot, &kept).unwrap();

    registry.delete(&cmdline(&["a.example.com"], &[])).unwrap();
    registry.restore(&["kept.sql.gz".to_string()]).unwrap();
    assert_eq!(row_count(&registry), 1);
}

#[test]
fn test_restore_argument_count() {
    let (registry, _dir) = registry(RoleModel::Module);
    assert!(matches!(registry.restore(&[]), Err(EncError::Usage(_))));
    let two = vec!["a.sql.gz".to_string(), "b.sql.gz".to_string()];
    assert!(matches!(registry.restore(&two), Err(EncError::Usage(_))));
    let missing = vec!["missing.sql.gz".to_string()];
    assert!(matches!(registry.restore(&missing), Err(EncError::BackupNotFound(_))));
}

#[test]
fn test_every_mutation_writes_snapshot() {
    let (registry, _dir) = registry(RoleModel::Module);
    let add = registry.add(&cmdline(&["a.example.com"], &[("role", "web")])).unwrap();
    let change = registry.change(&cmdline(&["a.example.com"], &[("role", "db")])).unwrap();
    let delete = registry.delete(&cmdline(&["a.example.com"], &[])).unwrap();
    for report in [add, change, delete] {
        assert!(report.backup.is_file(), "{} left no snapshot", report.action);
    }
}
