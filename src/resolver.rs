//! Dependency walker (spec §4.5): enumerates install and uninstall sets
//! under conflict/replacement rules.

use std::collections::{HashMap, HashSet};

use smol_str::SmolStr;

use crate::archive::{PackageInfo, PackageSpec};
use crate::error::{ErrorKind, GooError};
use crate::repo::{self, RepoMap};
use crate::state_db::StateDb;
use crate::version::{self, Version};

#[derive(Debug, Clone)]
pub enum PlanStep {
    /// A package to remove before the install that replaces it.
    RemoveForReplace(PackageInfo),
    /// A package to install, resolved to a concrete repo.
    Install { pi: PackageInfo, repo_url: String },
}

/// Parses `name[.arch][ min-version]`, the same grammar `PackageInfo`'s own
/// `Display` produces (archive.rs), as used in `Conflicts`/`Replaces` lists.
fn parse_name_arch_ver(entry: &str) -> (SmolStr, SmolStr, Option<Version>) {
    let (name_arch, ver) = match entry.split_once(' ') {
        Some((na, v)) => (na, Some(v)),
        None => (entry, None),
    };
    let (name, arch) = match name_arch.split_once('.') {
        Some((name, arch)) => (SmolStr::from(name), SmolStr::from(arch)),
        None => (SmolStr::from(name_arch), SmolStr::from("")),
    };
    let min_ver = ver.and_then(|v| version::parse(v).ok());
    (name, arch, min_ver)
}

fn parse_name_arch(entry: &str) -> (SmolStr, SmolStr) {
    let (name, arch, _) = parse_name_arch_ver(entry);
    (name, arch)
}

/// `needs_installation`: `false` if the installed version is >= `pi.version`.
pub fn needs_installation(pi: &PackageInfo, db: &StateDb) -> Result<bool, GooError> {
    let Some(installed) = db.fetch_exact(&pi.name, &pi.arch)? else {
        return Ok(true);
    };
    if pi.ver.is_empty() {
        return Ok(false);
    }
    let installed_ver = version::parse(installed.version())?;
    let wanted_ver = version::parse(&pi.ver)?;
    Ok(version::compare(&installed_ver, &wanted_ver) == std::cmp::Ordering::Less)
}

fn min_version_satisfied(installed: &Version, min: &Version) -> bool {
    version::compare(installed, min) != std::cmp::Ordering::Less
}

fn check_conflicts(spec: &PackageSpec, db: &StateDb) -> Result<(), GooError> {
    for entry in &spec.conflicts {
        let (name, arch, min_ver) = parse_name_arch_ver(entry);
        let installed = if arch.is_empty() {
            db.fetch_one(&name)?
        } else {
            db.fetch_exact(&name, &arch)?
        };
        let Some(installed) = installed else { continue };

        if let Some(min_ver) = &min_ver {
            let installed_ver = version::parse(installed.version())?;
            if !min_version_satisfied(&installed_ver, min_ver) {
                continue;
            }
        }

        return Err(GooError::resolve(format!(
            "package '{}' conflicts with installed package '{name}'",
            spec.identity.name
        )));
    }
    Ok(())
}

/// `resolve_install`: returns an ordered plan, dependencies before
/// dependents, pre-install removals of replaced packages just before the
/// replacement install.
pub fn resolve_install(
    spec: &PackageSpec,
    repo_map: &RepoMap,
    archs: &[String],
    db: &StateDb,
) -> Result<Vec<PlanStep>, GooError> {
    check_conflicts(spec, db)?;

    let mut plan = Vec::new();
    let mut frontier: HashSet<(SmolStr, SmolStr)> = HashSet::new();
    resolve_deps_recursive(spec, repo_map, archs, db, &mut plan, &mut frontier)?;

    for entry in &spec.replaces {
        let (name, arch, min_ver) = parse_name_arch_ver(entry);
        let installed = if arch.is_empty() {
            db.fetch_one(&name)?
        } else {
            db.fetch_exact(&name, &arch)?
        };
        let Some(installed) = installed else { continue };

        if let Some(min_ver) = &min_ver {
            let installed_ver = version::parse(installed.version())?;
            if !min_version_satisfied(&installed_ver, min_ver) {
                continue;
            }
        }

        plan.push(PlanStep::RemoveForReplace(PackageInfo::new(
            installed.name().clone(),
            installed.arch().clone(),
            installed.version().clone(),
        )));
    }

    let repo_url = match repo::what_repo(&spec.identity, repo_map) {
        Ok(url) => url,
        Err(_) => best_repo_for(&spec.identity, repo_map, archs)?,
    };
    plan.push(PlanStep::Install {
        pi: spec.identity.clone(),
        repo_url,
    });

    Ok(plan)
}

fn best_repo_for(pi: &PackageInfo, repo_map: &RepoMap, archs: &[String]) -> Result<String, GooError> {
    let (_, repo_url, _) = repo::find_repo_latest(pi, repo_map, archs)?;
    Ok(repo_url.to_string())
}

fn resolve_deps_recursive(
    spec: &PackageSpec,
    repo_map: &RepoMap,
    archs: &[String],
    db: &StateDb,
    plan: &mut Vec<PlanStep>,
    frontier: &mut HashSet<(SmolStr, SmolStr)>,
) -> Result<(), GooError> {
    for (dep_key, min_ver_str) in &spec.pkg_dependencies {
        let (name, arch) = parse_name_arch(dep_key);
        let min_ver = version::parse(min_ver_str)?;

        if frontier.contains(&(name.clone(), arch.clone())) {
            continue; // already scheduled earlier in this plan
        }

        if let Some(installed) = db.fetch_exact(&name, &arch)? {
            let installed_ver = version::parse(installed.version())?;
            if min_version_satisfied(&installed_ver, &min_ver) {
                continue;
            }
        }

        let dep_pi = PackageInfo::new(name.clone(), arch.clone(), SmolStr::from(""));
        let (found_ver, repo_url, found_arch) = repo::find_repo_latest(&dep_pi, repo_map, archs)
            .map_err(|_| GooError::resolve(format!("cannot resolve dependency '{dep_key}' >= {min_ver_str}")))?;
        if !min_version_satisfied(&found_ver, &min_ver) {
            return Err(GooError::resolve(format!(
                "cannot resolve dependency '{dep_key}' >= {min_ver_str}, best available is {found_ver}"
            )));
        }

        frontier.insert((name.clone(), found_arch.clone()));
        let dep_spec = repo_map
            .get(repo_url)
            .and_then(|repo| repo::find_repo_spec(&PackageInfo::new(name.clone(), found_arch.clone(), found_ver.as_str()), repo).ok())
            .map(|rs| rs.spec.clone());

        if let Some(dep_spec) = dep_spec {
            resolve_deps_recursive(&dep_spec, repo_map, archs, db, plan, frontier)?;
        }

        plan.push(PlanStep::Install {
            pi: PackageInfo::new(name, found_arch, found_ver.as_str()),
            repo_url: repo_url.to_string(),
        });
    }
    Ok(())
}

/// `enumerate_deps`: breadth-first reverse-dependency walk over installed
/// rows. Returns the dependent map and the removal order (zero-dependent
/// nodes first, the requested root last; a residual cycle is broken by
/// picking the lexicographically smallest remaining `(name, arch)`, logged
/// as an explicit, tested, arbitrary choice per spec §9 open question 3).
pub fn enumerate_deps(
    pi: &PackageInfo,
    db: &StateDb,
) -> Result<(HashMap<(SmolStr, SmolStr), Vec<(SmolStr, SmolStr)>>, Vec<PackageInfo>), GooError> {
    let all = db.fetch_all(None)?;

    // dependent_map[(name,arch)] = packages that declare a dependency on (name,arch)
    let mut dependent_map: HashMap<(SmolStr, SmolStr), Vec<(SmolStr, SmolStr)>> = HashMap::new();
    let mut targets: HashSet<(SmolStr, SmolStr)> = HashSet::new();
    targets.insert((pi.name.clone(), pi.arch.clone()));

    // Fixed point: repeatedly add rows depending (transitively) on anything in `targets`.
    loop {
        let mut added = false;
        for row in &all {
            let row_key = (row.name().clone(), row.arch().clone());
            if targets.contains(&row_key) {
                continue;
            }
            let depends_on_target = row.spec.pkg_dependencies.keys().any(|dep_key| {
                let (dep_name, dep_arch) = parse_name_arch(dep_key);
                targets.iter().any(|(tn, ta)| {
                    &dep_name == tn && (dep_arch.is_empty() || &dep_arch == ta)
                })
            });
            if depends_on_target {
                for dep_key in row.spec.pkg_dependencies.keys() {
                    let (dep_name, dep_arch) = parse_name_arch(dep_key);
                    for (tn, ta) in targets.clone() {
                        if dep_name == tn && (dep_arch.is_empty() || dep_arch == ta) {
                            dependent_map.entry((tn, ta)).or_default().push(row_key.clone());
                        }
                    }
                }
                targets.insert(row_key);
                added = true;
            }
        }
        if !added {
            break;
        }
    }

    let mut remaining: HashSet<(SmolStr, SmolStr)> = targets.clone();
    let mut order: Vec<(SmolStr, SmolStr)> = Vec::new();
    let root_key = (pi.name.clone(), pi.arch.clone());
    remaining.remove(&root_key);

    while !remaining.is_empty() {
        let zero_dependent = remaining
            .iter()
            .find(|key| {
                dependent_map
                    .get(*key)
                    .map(|dependents| dependents.iter().all(|d| !remaining.contains(d)))
                    .unwrap_or(true)
            })
            .cloned();

        let pick = match zero_dependent {
            Some(key) => key,
            None => {
                let mut sorted: Vec<_> = remaining.iter().cloned().collect();
                sorted.sort();
                let key = sorted.into_iter().next().unwrap();
                log::warn!("dependency graph has a residual cycle; breaking at {}.{}", key.0, key.1);
                key
            }
        };
        remaining.remove(&pick);
        order.push(pick);
    }
    order.push(root_key);

    let list = order
        .into_iter()
        .filter_map(|(name, arch)| {
            all.iter()
                .find(|row| row.name() == &name && row.arch() == &arch)
                .map(|row| PackageInfo::new(row.name().clone(), row.arch().clone(), row.version().clone()))
        })
        .collect();

    Ok((dependent_map, list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{PackageInfo as PI, PackageSpec};
    use crate::state_db::PackageState;
    use std::collections::HashMap as Map;

    fn state(name: &str, deps: &[&str]) -> PackageState {
        let mut spec = PackageSpec::default();
        spec.identity = PI::new(name, "noarch", "1.0.0");
        for dep in deps {
            spec.pkg_dependencies.insert(SmolStr::from(*dep), SmolStr::from("1.0.0"));
        }
        PackageState {
            spec,
            source_repo: "repo".into(),
            download_url: "repo/a.goo".into(),
            checksum: "x".into(),
            local_path: "cache/a.goo".into(),
            unpack_dir: None,
            installed_files: Map::new(),
            install_date: 0,
            installed_app: None,
        }
    }

    #[test]
    fn removal_order_chains_through_transitive_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.add(state("a", &[])).unwrap();
        db.add(state("b", &["a.noarch"])).unwrap();
        db.add(state("c", &["b.noarch"])).unwrap();
        db.add(state("d", &["c.noarch"])).unwrap();

        let pi = PI::new("a", "noarch", "");
        let (_, order) = enumerate_deps(&pi, &db).unwrap();
        let names: Vec<_> = order.iter().map(|p| p.name.to_string()).collect();
        assert_eq!(names, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn needs_installation_false_when_installed_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.add(state("a", &[])).unwrap();
        let pi = PI::new("a", "noarch", "0.9.0");
        assert!(!needs_installation(&pi, &db).unwrap());
    }

    #[test]
    fn needs_installation_true_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        let pi = PI::new("a", "noarch", "1.0.0");
        assert!(needs_installation(&pi, &db).unwrap());
    }

    #[test]
    fn conflict_with_min_version_ignores_older_installed() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.add(state("old", &[])).unwrap(); // installed at 1.0.0

        let mut spec = PackageSpec::default();
        spec.identity = PI::new("new", "noarch", "1.0.0");
        spec.conflicts.push(SmolStr::from("old.noarch 2.0.0"));
        check_conflicts(&spec, &db).unwrap(); // 1.0.0 < 2.0.0, not a conflict
    }

    #[test]
    fn conflict_with_min_version_triggers_on_satisfying_installed() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::new(&dir.path().join("googet.db")).unwrap();
        db.add(state("old", &[])).unwrap(); // installed at 1.0.0

        let mut spec = PackageSpec::default();
        spec.identity = PI::new("new", "noarch", "1.0.0");
        spec.conflicts.push(SmolStr::from("old.noarch 1.0.0"));
        assert!(check_conflicts(&spec, &db).is_err());
    }

    #[test]
    fn parse_name_arch_ver_splits_name_arch_and_version() {
        let (name, arch, ver) = parse_name_arch_ver("foo.noarch 1.2.0");
        assert_eq!(name.as_str(), "foo");
        assert_eq!(arch.as_str(), "noarch");
        assert_eq!(ver.unwrap().as_str(), "1.2.0");
    }
}
