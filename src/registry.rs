//! Process-wide resource bookkeeping shared across compilation units.
//!
//! The registry owns the `(resourceType, packageRoot)` partitioned maps from
//! resource path to output path, with collision resolution on promotion. The
//! content cache skips recompiling identical module content. Both are
//! mutex-guarded; every public call takes the lock once, so the collision
//! check and the mutation it guards are atomic.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::report::{Reporter, REGISTRY_CONFLICT, TRANSFORM_CONFLICT};

/// Package partition used when no subpackage root is given.
pub const MAIN_PACKAGE: &str = "main";

/// First 7 hex chars of the sha-256 of `path`. Used for module ids,
/// collision suffixes and compression seeds.
pub fn path_hash(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..7].to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE MAP REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// `true`-style placeholder or a concrete output path.
#[derive(Debug, Clone, PartialEq)]
enum MapEntry {
    Placeholder,
    Output(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordOptions {
    pub resource_path: String,
    pub resource_type: String,
    pub output_path: Option<String>,
    pub package_root: Option<String>,
    /// Register the mapping for lookups without claiming the emission, so a
    /// later caller still sees `already_outputted: false`.
    pub record_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub output_path: Option<String>,
    pub already_outputted: bool,
}

#[derive(Default)]
pub struct ResourceRegistry {
    maps: Mutex<HashMap<(String, String), HashMap<String, MapEntry>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one resource. Placeholder registration, promotion with an
    /// intra-package collision scan, and the concrete-vs-concrete conflict
    /// check all happen under one lock acquisition.
    pub fn record(&self, options: &RecordOptions, reporter: &mut Reporter) -> RecordOutcome {
        let package = options
            .package_root
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| MAIN_PACKAGE.to_string());
        let key = (options.resource_type.clone(), package);

        let mut maps = lock_recovering(&self.maps);
        let map = maps.entry(key).or_default();

        let existing = map.get(&options.resource_path).cloned();
        match (existing, &options.output_path) {
            (Some(MapEntry::Output(current)), Some(requested)) => {
                if &current == requested {
                    RecordOutcome {
                        output_path: Some(current),
                        already_outputted: !options.record_only,
                    }
                } else {
                    reporter.error(
                        REGISTRY_CONFLICT,
                        format!(
                            "resource {} is already mapped to {} and cannot move to {}",
                            options.resource_path, current, requested
                        ),
                    );
                    RecordOutcome {
                        output_path: Some(current),
                        already_outputted: !options.record_only,
                    }
                }
            }
            (Some(MapEntry::Output(current)), None) => RecordOutcome {
                output_path: Some(current),
                already_outputted: !options.record_only,
            },
            (_, Some(requested)) => {
                // Fresh registration or placeholder promotion: never steal
                // another resource's output path inside the same package.
                let resolved = resolve_collision(
                    map,
                    &options.resource_path,
                    requested,
                    reporter,
                );
                map.insert(
                    options.resource_path.clone(),
                    MapEntry::Output(resolved.clone()),
                );
                RecordOutcome {
                    output_path: Some(resolved),
                    already_outputted: false,
                }
            }
            (existing, None) => {
                if existing.is_none() {
                    map.insert(options.resource_path.clone(), MapEntry::Placeholder);
                }
                RecordOutcome {
                    output_path: None,
                    already_outputted: false,
                }
            }
        }
    }

    /// Concrete output path for a resource, if promoted.
    pub fn output_path(
        &self,
        resource_type: &str,
        package_root: Option<&str>,
        resource_path: &str,
    ) -> Option<String> {
        let package = package_root.filter(|p| !p.is_empty()).unwrap_or(MAIN_PACKAGE);
        let maps = lock_recovering(&self.maps);
        match maps
            .get(&(resource_type.to_string(), package.to_string()))
            .and_then(|map| map.get(resource_path))
        {
            Some(MapEntry::Output(path)) => Some(path.clone()),
            _ => None,
        }
    }

    /// Per-package view of one resource type, placeholder entries rendered
    /// as JSON `true` the way downstream tooling reads them.
    pub fn resource_map(
        &self,
        resource_type: &str,
    ) -> BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        let maps = lock_recovering(&self.maps);
        let mut out: BTreeMap<String, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
        for ((rtype, package), map) in maps.iter() {
            if rtype != resource_type {
                continue;
            }
            let slot = out.entry(package.clone()).or_default();
            for (resource, entry) in map {
                let value = match entry {
                    MapEntry::Placeholder => serde_json::Value::Bool(true),
                    MapEntry::Output(path) => serde_json::Value::String(path.clone()),
                };
                slot.insert(resource.clone(), value);
            }
        }
        out
    }
}

fn resolve_collision(
    map: &HashMap<String, MapEntry>,
    resource_path: &str,
    requested: &str,
    reporter: &mut Reporter,
) -> String {
    let collides = |candidate: &str| {
        map.iter().any(|(other, entry)| {
            other != resource_path && matches!(entry, MapEntry::Output(p) if p == candidate)
        })
    };
    if !collides(requested) {
        return requested.to_string();
    }

    let mut renamed = insert_hash_suffix(requested, &path_hash(resource_path));
    let mut n = 1u32;
    while collides(&renamed) {
        renamed = insert_hash_suffix(requested, &format!("{}{}", path_hash(resource_path), n));
        n += 1;
    }
    reporter.warn(
        TRANSFORM_CONFLICT,
        format!(
            "output path {} is taken inside the package; {} now writes to {}",
            requested, resource_path, renamed
        ),
    );
    renamed
}

/// `assets/img.png` with hash `abc1234` becomes `assets/img.abc1234.png`;
/// extensionless paths get the hash appended.
fn insert_hash_suffix(output_path: &str, hash: &str) -> String {
    let after_slash = output_path.rfind('/').map_or(0, |s| s + 1);
    match output_path.rfind('.') {
        Some(dot) if dot > after_slash => {
            format!("{}.{}{}", &output_path[..dot], hash, &output_path[dot..])
        }
        _ => format!("{}.{}", output_path, hash),
    }
}

pub(crate) fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTENT CACHE
// ═══════════════════════════════════════════════════════════════════════════════

struct CacheEntry {
    hash: String,
    compiled: String,
}

/// Compiled-text cache, hash-compared before reuse. The key is the resource
/// path plus whatever discriminates the compilation (dialect, option
/// fingerprint); two option sets must never share an entry.
#[derive(Default)]
pub struct ContentCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str, source: &str) -> Option<String> {
        let entries = lock_recovering(&self.entries);
        let entry = entries.get(key)?;
        if entry.hash == Self::compute_hash(source) {
            Some(entry.compiled.clone())
        } else {
            None
        }
    }

    pub fn set(&self, key: &str, source: &str, compiled: String) {
        let mut entries = lock_recovering(&self.entries);
        entries.insert(
            key.to_string(),
            CacheEntry {
                hash: Self::compute_hash(source),
                compiled,
            },
        );
    }
}
