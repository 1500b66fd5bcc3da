// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the leaf repository.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use herbarium_core::models::{graft_node_id, StemConfig, StemType};
use herbarium_core::{
    Catalog, CatalogError, Leaf, LeafRepository, LeafStatus, Stem, StemKey, StemRepository,
};

fn setup() -> (StemRepository, LeafRepository, StemKey) {
    let catalog = Arc::new(Catalog::new());
    let stem_repo = StemRepository::new(catalog.clone());
    let leaf_repo = LeafRepository::new(catalog);
    let key = StemKey::new("test-stem", "1.0.0");

    let config = StemConfig {
        name: "test-stem".to_string(),
        url: "/test".to_string(),
        command: "ping 127.0.0.1".to_string(),
        env: HashMap::new(),
        dependencies: Vec::new(),
        version: "1.0.0".to_string(),
        min_instances: None,
        start_message: None,
    };
    stem_repo
        .save(
            &key,
            Stem {
                name: "test-stem".to_string(),
                stem_type: StemType::Deployment,
                working_url: "/test".to_string(),
                haproxy_backend: "test".to_string(),
                version: "1.0.0".to_string(),
                environment: HashMap::new(),
                leaf_instances: HashMap::new(),
                graft_node_leaf: None,
                config,
            },
        )
        .unwrap();

    (stem_repo, leaf_repo, key)
}

fn graft_leaf(key: &StemKey, port: u16) -> Leaf {
    let id = graft_node_id(&key.name, &key.version);
    Leaf {
        id: id.clone(),
        pid: 0,
        haproxy_server: id,
        port,
        status: LeafStatus::Running,
        initialized: Utc::now(),
    }
}

#[test]
fn test_add_and_find_leaf() {
    let (_, leaf_repo, key) = setup();

    leaf_repo
        .add_leaf(&key, "leaf-1", "leaf-1", 12345, 8000, Utc::now())
        .unwrap();

    let leaf = leaf_repo.find_leaf(&key, "leaf-1").unwrap();
    assert_eq!(leaf.id, "leaf-1");
    assert_eq!(leaf.pid, 12345);
    assert_eq!(leaf.port, 8000);
    assert_eq!(leaf.haproxy_server, "leaf-1");
    assert_eq!(leaf.status, LeafStatus::Running);
}

#[test]
fn test_add_leaf_to_missing_stem_fails() {
    let (_, leaf_repo, _) = setup();
    let err = leaf_repo
        .add_leaf(
            &StemKey::new("ghost", "1.0.0"),
            "leaf-1",
            "leaf-1",
            1,
            8000,
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(err, CatalogError::StemNotFound { .. }));
}

#[test]
fn test_add_duplicate_leaf_fails() {
    let (_, leaf_repo, key) = setup();
    leaf_repo
        .add_leaf(&key, "leaf-1", "leaf-1", 1, 8000, Utc::now())
        .unwrap();
    let err = leaf_repo
        .add_leaf(&key, "leaf-1", "leaf-1", 2, 8001, Utc::now())
        .unwrap_err();
    assert!(matches!(err, CatalogError::LeafAlreadyExists { .. }));
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn test_remove_leaf() {
    let (_, leaf_repo, key) = setup();
    leaf_repo
        .add_leaf(&key, "leaf-1", "leaf-1", 1, 8000, Utc::now())
        .unwrap();

    leaf_repo.remove_leaf(&key, "leaf-1").unwrap();

    let err = leaf_repo.find_leaf(&key, "leaf-1").unwrap_err();
    assert!(matches!(err, CatalogError::LeafNotFound { .. }));
}

#[test]
fn test_remove_missing_leaf_fails() {
    let (_, leaf_repo, key) = setup();
    let err = leaf_repo.remove_leaf(&key, "ghost").unwrap_err();
    assert!(matches!(err, CatalogError::LeafNotFound { .. }));
}

#[test]
fn test_list_leaves() {
    let (_, leaf_repo, key) = setup();
    leaf_repo
        .add_leaf(&key, "leaf-1", "leaf-1", 1, 8000, Utc::now())
        .unwrap();
    leaf_repo
        .add_leaf(&key, "leaf-2", "leaf-2", 2, 8001, Utc::now())
        .unwrap();

    let mut ids: Vec<String> = leaf_repo
        .list_leaves(&key)
        .unwrap()
        .into_iter()
        .map(|l| l.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["leaf-1", "leaf-2"]);
}

#[test]
fn test_update_leaf_status() {
    let (_, leaf_repo, key) = setup();
    leaf_repo
        .add_leaf(&key, "leaf-1", "leaf-1", 1, 8000, Utc::now())
        .unwrap();

    leaf_repo
        .update_leaf_status(&key, "leaf-1", LeafStatus::Stopping)
        .unwrap();

    let leaf = leaf_repo.find_leaf(&key, "leaf-1").unwrap();
    assert_eq!(leaf.status, LeafStatus::Stopping);
}

#[test]
fn test_graft_node_set_get_clear() {
    let (stem_repo, leaf_repo, key) = setup();

    assert!(leaf_repo.graft_node(&key).unwrap().is_none());

    leaf_repo.set_graft_node(&key, graft_leaf(&key, 8000)).unwrap();

    let graft = leaf_repo.graft_node(&key).unwrap().unwrap();
    assert_eq!(graft.id, "test-stem-1.0.0-graftnode");
    assert_eq!(graft.pid, 0);
    assert_eq!(graft.status, LeafStatus::Running);

    leaf_repo.clear_graft_node(&key).unwrap();
    assert!(leaf_repo.graft_node(&key).unwrap().is_none());

    // Graft exclusivity: clearing the graft leaves the instances map intact.
    let stem = stem_repo.fetch(&key).unwrap();
    assert!(stem.graft_node_leaf.is_none());
    assert!(stem.leaf_instances.is_empty());
}

#[test]
fn test_graft_node_on_missing_stem_fails() {
    let (_, leaf_repo, _) = setup();
    let ghost = StemKey::new("ghost", "1.0.0");
    assert!(leaf_repo.graft_node(&ghost).is_err());
    assert!(leaf_repo.set_graft_node(&ghost, graft_leaf(&ghost, 8000)).is_err());
    assert!(leaf_repo.clear_graft_node(&ghost).is_err());
}

#[test]
fn test_unique_ports_across_running_leaves() {
    let (stem_repo, leaf_repo, key) = setup();
    let key2 = StemKey::new("other-stem", "1.0.0");
    stem_repo
        .save(
            &key2,
            Stem {
                name: "other-stem".to_string(),
                stem_type: StemType::Deployment,
                working_url: "/other".to_string(),
                haproxy_backend: "other".to_string(),
                version: "1.0.0".to_string(),
                environment: HashMap::new(),
                leaf_instances: HashMap::new(),
                graft_node_leaf: None,
                config: StemConfig {
                    name: "other-stem".to_string(),
                    url: "/other".to_string(),
                    command: "ping 127.0.0.1".to_string(),
                    env: HashMap::new(),
                    dependencies: Vec::new(),
                    version: "1.0.0".to_string(),
                    min_instances: None,
                    start_message: None,
                },
            },
        )
        .unwrap();

    leaf_repo
        .add_leaf(&key, "leaf-1", "leaf-1", 1, 8000, Utc::now())
        .unwrap();
    leaf_repo
        .add_leaf(&key2, "leaf-2", "leaf-2", 2, 8001, Utc::now())
        .unwrap();

    let mut ports: Vec<u16> = Vec::new();
    for k in [&key, &key2] {
        for leaf in leaf_repo.list_leaves(k).unwrap() {
            if leaf.status == LeafStatus::Running {
                ports.push(leaf.port);
            }
        }
    }
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 2, "running leaves must hold distinct ports");
}
