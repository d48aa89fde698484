//! OS package installation.
//!
//! Models one `apt-get update && apt-get install -y ... && rm -rf
//! /var/lib/apt/lists/*` transaction. Every requested name is resolved against
//! the catalog before the snapshot is touched, so an unknown package leaves the
//! image exactly as it was.

use std::collections::{BTreeMap, BTreeSet};

use codebox_core::recipe::BaseImageRef;

use crate::base::stub_binary;
use crate::error::ProvisionError;
use crate::snapshot::{Snapshot, ROOT_UID};

const APT_GET: &str = "/usr/bin/apt-get";
const APT_LISTS: &str = "/var/lib/apt/lists";

/// One installable package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub depends: Vec<String>,
    /// Executables the package ships.
    pub binaries: Vec<String>,
    /// Other regular files (mode 0644).
    pub files: Vec<String>,
}

/// Package index of a base image release.
pub trait PackageCatalog {
    /// Release codename, used for the index list file names.
    fn release(&self) -> &str;

    fn lookup(&self, name: &str) -> Option<&PackageInfo>;
}

/// Static apt index.
#[derive(Debug, Clone)]
pub struct AptCatalog {
    release: String,
    entries: BTreeMap<String, PackageInfo>,
}

impl AptCatalog {
    pub fn new(release: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_package(mut self, info: PackageInfo) -> Self {
        self.entries.insert(info.name.clone(), info);
        self
    }

    /// Catalog for a supported base image.
    pub fn for_base(base: &BaseImageRef) -> Option<Self> {
        match (base.name.as_str(), base.version.as_str()) {
            ("ubuntu", "20.04") => Some(Self::focal()),
            _ => None,
        }
    }

    /// Subset of the Ubuntu 20.04 (focal) archive.
    pub fn focal() -> Self {
        let pkg = |name: &str, version: &str, depends: &[&str], binaries: &[&str], files: &[&str]| PackageInfo {
            name: name.to_string(),
            version: version.to_string(),
            depends: depends.iter().map(|s| s.to_string()).collect(),
            binaries: binaries.iter().map(|s| s.to_string()).collect(),
            files: files.iter().map(|s| s.to_string()).collect(),
        };
        [
            pkg("wget", "1.20.3-1ubuntu2.1", &["libssl1.1"], &["/usr/bin/wget"], &["/etc/wgetrc"]),
            pkg("tar", "1.30+dfsg-7ubuntu0.20.04.3", &[], &["/bin/tar"], &[]),
            pkg(
                "ca-certificates",
                "20230311ubuntu0.20.04.1",
                &["openssl"],
                &["/usr/sbin/update-ca-certificates"],
                &["/etc/ssl/certs/ca-certificates.crt"],
            ),
            pkg("openssl", "1.1.1f-1ubuntu2.20", &["libssl1.1"], &["/usr/bin/openssl"], &["/etc/ssl/openssl.cnf"]),
            pkg("libssl1.1", "1.1.1f-1ubuntu2.20", &[], &[], &["/usr/lib/x86_64-linux-gnu/libssl.so.1.1"]),
            pkg("curl", "7.68.0-1ubuntu2.21", &["libcurl4"], &["/usr/bin/curl"], &[]),
            pkg("libcurl4", "7.68.0-1ubuntu2.21", &["libssl1.1"], &[], &["/usr/lib/x86_64-linux-gnu/libcurl.so.4"]),
            pkg("git", "1:2.25.1-1ubuntu3.11", &["libcurl4"], &["/usr/bin/git"], &[]),
            pkg("gzip", "1.10-0ubuntu4.1", &[], &["/bin/gzip"], &[]),
            pkg("xz-utils", "5.2.4-1ubuntu1.1", &[], &["/usr/bin/xz"], &[]),
            pkg("unzip", "6.0-25ubuntu1.1", &[], &["/usr/bin/unzip"], &[]),
            pkg("make", "4.2.1-1.2", &[], &["/usr/bin/make"], &[]),
            pkg("gcc", "4:9.3.0-1ubuntu2", &[], &["/usr/bin/gcc", "/usr/bin/cc"], &[]),
            pkg("build-essential", "12.8ubuntu1.1", &["gcc", "make"], &[], &["/usr/share/build-essential/list"]),
            pkg("python3", "3.8.2-0ubuntu2", &[], &["/usr/bin/python3"], &[]),
            pkg("libjemalloc2", "5.2.1-1ubuntu1", &[], &[], &["/usr/lib/x86_64-linux-gnu/libjemalloc.so.2"]),
            pkg("tzdata", "2024a-0ubuntu0.20.04", &[], &[], &["/usr/share/zoneinfo/UTC"]),
        ]
        .into_iter()
        .fold(Self::new("focal"), Self::with_package)
    }
}

impl PackageCatalog for AptCatalog {
    fn release(&self) -> &str {
        &self.release
    }

    fn lookup(&self, name: &str) -> Option<&PackageInfo> {
        self.entries.get(name)
    }
}

/// Resolve `names` plus their dependencies, dependencies first.
fn resolve<'c>(
    catalog: &'c dyn PackageCatalog,
    names: &[String],
) -> Result<Vec<&'c PackageInfo>, ProvisionError> {
    let missing: Vec<String> = names
        .iter()
        .filter(|n| catalog.lookup(n).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ProvisionError::PackageInstall {
            reason: format!("Unable to locate package {}", missing.join(", ")),
            packages: missing,
        });
    }

    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut stack: Vec<(&str, bool)> = names.iter().rev().map(|n| (n.as_str(), false)).collect();
    while let Some((name, expanded)) = stack.pop() {
        if seen.contains(name) {
            continue;
        }
        let Some(info) = catalog.lookup(name) else {
            return Err(ProvisionError::PackageInstall {
                packages: vec![name.to_string()],
                reason: format!("Depends: {} but it is not installable", name),
            });
        };
        if expanded {
            seen.insert(name);
            order.push(info);
        } else {
            stack.push((name, true));
            for dep in info.depends.iter().rev() {
                if !seen.contains(dep.as_str()) {
                    stack.push((dep.as_str(), false));
                }
            }
        }
    }
    Ok(order)
}

/// Install `names` in one transaction. Returns the packages newly added to the
/// package database, in installation order.
pub fn install_packages(
    snapshot: &mut Snapshot,
    catalog: &dyn PackageCatalog,
    names: &[String],
) -> Result<Vec<String>, ProvisionError> {
    if !snapshot.is_executable_by(ROOT_UID, ROOT_UID, APT_GET) {
        return Err(ProvisionError::PackageInstall {
            packages: names.to_vec(),
            reason: format!("{}: command not found", APT_GET),
        });
    }
    let plan = resolve(catalog, names)?;

    // apt-get update
    let release = catalog.release();
    for suffix in ["InRelease", "main_binary-amd64_Packages", "universe_binary-amd64_Packages"] {
        let list = format!("{}/archive.ubuntu.com_ubuntu_dists_{}_{}", APT_LISTS, release, suffix);
        snapshot.write_file(&list, list.as_bytes(), ROOT_UID, ROOT_UID, 0o644)?;
    }

    let mut installed = Vec::new();
    for info in plan {
        for bin in &info.binaries {
            snapshot.write_file(bin, &stub_binary(bin), ROOT_UID, ROOT_UID, 0o755)?;
        }
        for file in &info.files {
            snapshot.write_file(file, file.as_bytes(), ROOT_UID, ROOT_UID, 0o644)?;
        }
        if snapshot.packages().get(&info.name) != Some(&info.version) {
            installed.push(info.name.clone());
        }
        snapshot.record_package(&info.name, &info.version);
        tracing::debug!(package = %info.name, version = %info.version, "Unpacked package");
    }

    // rm -rf /var/lib/apt/lists/*
    snapshot.clear_dir(APT_LISTS)?;
    Ok(installed)
}
