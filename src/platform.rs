//! Platform driver: one concrete Windows implementation (MSI/MSU/MSIX/script
//! dispatch, registry uninstall lookup) gated `#[cfg(windows)]`, plus a
//! portable driver that runs the same `ExecFile` contract through native
//! interpreters so the resolver/installer pipeline is exercisable on any
//! host.

use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use smol_str::SmolStr;

use crate::archive::{ExecFile, PackageSpec};
use crate::error::{ErrorKind, GooError};
use crate::state_db::{InstalledApp, PackageState};

pub mod os {
    pub const WIN: &str = "win";
    pub const WIN_GNU: &str = "win_gnu";
    pub const LINUX: &str = "linux";
    pub const LINUX_MUSL: &str = "linux_musl";
    pub const MAC: &str = "mac";
    pub const SOLARIS: &str = "solaris";
    pub const AIX: &str = "aix";
    pub const FREEBSD: &str = "freebsd";
    pub const NETBSD: &str = "netbsd";
    pub const OPENBSD: &str = "openbsd";
    pub const DRAGONFLYBSD: &str = "dragonflybsd";
    pub const ILLUMOS: &str = "illumos";
    pub const PLAN9: &str = "plan9";
}

pub mod cpu {
    pub const X86: &str = "x86";
    pub const X64: &str = "x64";
    pub const ARM32: &str = "arm32";
    pub const ARM64: &str = "arm64";
    pub const ARMV6L: &str = "armv6l";
    pub const LOONG64: &str = "loong64";
    pub const RISCV32: &str = "riscv32";
    pub const RISCV64: &str = "riscv64";
    pub const PPC32: &str = "ppc32";
    pub const PPC64: &str = "ppc64";
    pub const PPC64LE: &str = "ppc64le";
    pub const SPARC32: &str = "sparc32";
    pub const SPARC64: &str = "sparc64";
    pub const MIPS32: &str = "mips32";
    pub const MIPS64: &str = "mips64";
    pub const MIPS32LE: &str = "mips32le";
    pub const MIPS64LE: &str = "mips64le";
    pub const S390X: &str = "s390x";
}

pub fn create_platform_string(cpu: &str, os: &str) -> SmolStr {
    format!("{}-{}", cpu, os).into()
}

#[allow(unreachable_code)]
pub fn current_os() -> Option<&'static str> {
    #[cfg(target_os = "windows")]
    return Some(os::WIN);

    #[cfg(target_os = "linux")]
    return Some(os::LINUX);

    #[cfg(target_os = "macos")]
    return Some(os::MAC);

    None
}

#[allow(unreachable_code)]
pub fn current_cpu() -> Option<&'static str> {
    #[cfg(target_arch = "x86")]
    return Some(cpu::X86);

    #[cfg(target_arch = "x86_64")]
    return Some(cpu::X64);

    #[cfg(target_arch = "arm")]
    return Some(cpu::ARM32);

    #[cfg(target_arch = "aarch64")]
    return Some(cpu::ARM64);

    #[cfg(target_arch = "riscv32")]
    return Some(cpu::RISCV32);

    #[cfg(target_arch = "riscv64")]
    return Some(cpu::RISCV64);

    #[cfg(target_arch = "sparc")]
    return Some(cpu::SPARC32);

    #[cfg(target_arch = "sparc64")]
    return Some(cpu::SPARC64);

    None
}

/// Reboot-required MSI exit codes accepted as success in addition to a
/// package's own declared `ExitCodes` (spec §4.8).
const MSI_REBOOT_CODES: [i32; 2] = [1641, 3010];

fn exit_code_ok(status: std::process::ExitStatus, declared: &[i32], extra_ok: &[i32]) -> bool {
    match status.code() {
        Some(0) => true,
        Some(code) => declared.contains(&code) || extra_ok.contains(&code),
        None => false,
    }
}

/// The external contract a googet core delegates install/uninstall/verify
/// execution to (spec §4.8): given an extracted package directory and its
/// spec, run the declared `ExecFile`s and report success/failure.
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    async fn install(&self, extracted_dir: &Path, spec: &PackageSpec) -> Result<(), GooError>;
    async fn uninstall(&self, extracted_dir: &Path, state: &PackageState) -> Result<(), GooError>;
    async fn verify(&self, extracted_dir: &Path, spec: &PackageSpec) -> Result<(), GooError>;
    fn installable_archs(&self) -> Vec<SmolStr>;
    fn app_association(&self, spec: &PackageSpec, local_path: &Path) -> Option<InstalledApp>;
}

fn run_exec_file(extracted_dir: &Path, exec: &ExecFile, extra_ok: &[i32]) -> Result<(), GooError> {
    let full_path = extracted_dir.join(exec.path.as_str());
    let ext = full_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut command = match ext.as_str() {
        "msi" | "msp" => {
            let log_path = full_path.with_extension(format!("{ext}.log"));
            let mut c = Command::new("msiexec");
            c.arg("/i")
                .arg(&full_path)
                .arg("/qn")
                .arg("/norestart")
                .arg(format!("/log {}", log_path.display()));
            c
        }
        "msu" => {
            let mut c = Command::new("wusa");
            c.arg(&full_path).arg("/quiet").arg("/norestart");
            c
        }
        "msix" => {
            let mut c = Command::new("powershell");
            c.arg("-NoProfile")
                .arg("-Command")
                .arg(format!("Add-AppxPackage -Path '{}'", full_path.display()));
            c
        }
        "ps1" => {
            let mut c = Command::new("powershell");
            c.arg("-NoProfile").arg("-File").arg(&full_path);
            c
        }
        "cmd" | "bat" => {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&full_path);
            c
        }
        _ => Command::new(&full_path),
    };
    command.args(exec.args.iter().map(|a| a.as_str()));

    let output = command.output().map_err(|e| {
        GooError::wrap(ErrorKind::Subprocess, format!("failed to spawn '{}'", full_path.display()), e.into())
    })?;

    if exit_code_ok(output.status, &exec.exit_codes, extra_ok) {
        Ok(())
    } else {
        Err(GooError::new(
            ErrorKind::Subprocess,
            format!(
                "'{}' exited with {:?}\nstdout: {}\nstderr: {}",
                full_path.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
        ))
    }
}

/// Real driver, grounded on the `pahkat_client` Windows `package_store`
/// example (`examples/other_examples/ce45651f_divvun-pahkat__pahkat-client-core-src-package_store-windows.rs.rs`):
/// MSI/MSU/MSIX dispatch by file extension, registry-key lookup for
/// uninstall strings when a package carries no explicit `Uninstall` entry.
#[cfg(windows)]
pub struct WindowsDriver;

#[cfg(windows)]
#[async_trait]
impl PlatformDriver for WindowsDriver {
    async fn install(&self, extracted_dir: &Path, spec: &PackageSpec) -> Result<(), GooError> {
        if !spec.install.is_set() {
            return Ok(());
        }
        let extracted_dir = extracted_dir.to_path_buf();
        let exec = spec.install.clone();
        tokio::task::spawn_blocking(move || run_exec_file(&extracted_dir, &exec, &MSI_REBOOT_CODES))
            .await
            .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "installer task panicked", e.into()))?
    }

    async fn uninstall(&self, extracted_dir: &Path, state: &PackageState) -> Result<(), GooError> {
        if state.spec.uninstall.is_set() {
            let extracted_dir = extracted_dir.to_path_buf();
            let exec = state.spec.uninstall.clone();
            return tokio::task::spawn_blocking(move || run_exec_file(&extracted_dir, &exec, &MSI_REBOOT_CODES))
                .await
                .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "uninstaller task panicked", e.into()))?;
        }
        let Some(app) = &state.installed_app else {
            return Ok(());
        };
        uninstall_via_registry(&app.reg_key)
    }

    async fn verify(&self, extracted_dir: &Path, spec: &PackageSpec) -> Result<(), GooError> {
        if !spec.verify.is_set() {
            return Ok(());
        }
        let extracted_dir = extracted_dir.to_path_buf();
        let exec = spec.verify.clone();
        tokio::task::spawn_blocking(move || run_exec_file(&extracted_dir, &exec, &[]))
            .await
            .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "verify task panicked", e.into()))?
    }

    fn installable_archs(&self) -> Vec<SmolStr> {
        let mut archs = vec![SmolStr::from("noarch")];
        if let Some(cpu) = current_cpu() {
            archs.push(SmolStr::from(match cpu {
                cpu::X64 => "x86_64",
                cpu::ARM64 => "arm64",
                _ => "x86_32",
            }));
        }
        archs
    }

    fn app_association(&self, spec: &PackageSpec, _local_path: &Path) -> Option<InstalledApp> {
        let key = winreg::RegKey::predef(winreg::enums::HKEY_LOCAL_MACHINE)
            .open_subkey(r"Software\Microsoft\Windows\CurrentVersion\Uninstall")
            .ok()?;
        for sub in key.enum_keys().flatten() {
            let Ok(subkey) = key.open_subkey(&sub) else { continue };
            let display_name: Result<String, _> = subkey.get_value("DisplayName");
            if let Ok(display_name) = display_name {
                if display_name.to_ascii_lowercase().contains(&spec.identity.name.to_ascii_lowercase()) {
                    return Some(InstalledApp {
                        display_name: SmolStr::from(display_name),
                        reg_key: SmolStr::from(sub),
                    });
                }
            }
        }
        None
    }
}

#[cfg(windows)]
fn uninstall_via_registry(reg_key: &str) -> Result<(), GooError> {
    let key = winreg::RegKey::predef(winreg::enums::HKEY_LOCAL_MACHINE)
        .open_subkey(format!(r"Software\Microsoft\Windows\CurrentVersion\Uninstall\{reg_key}"))
        .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "uninstall registry key not found", e.into()))?;
    let uninstall_string: String = key
        .get_value("QuietUninstallString")
        .or_else(|_| key.get_value("UninstallString"))
        .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "no uninstall command in registry", e.into()))?;

    let status = Command::new("cmd")
        .arg("/C")
        .arg(&uninstall_string)
        .status()
        .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "failed to spawn registry uninstaller", e.into()))?;
    if status.success() {
        Ok(())
    } else {
        Err(GooError::new(ErrorKind::Subprocess, format!("uninstall command exited with {:?}", status.code())))
    }
}

/// Portable driver used on non-Windows hosts (and by default in tests): runs
/// the same `ExecFile` contract through whatever interpreter the extension
/// implies, with no registry fallback.
pub struct PortableDriver;

#[async_trait]
impl PlatformDriver for PortableDriver {
    async fn install(&self, extracted_dir: &Path, spec: &PackageSpec) -> Result<(), GooError> {
        if !spec.install.is_set() {
            return Ok(());
        }
        let extracted_dir = extracted_dir.to_path_buf();
        let exec = spec.install.clone();
        tokio::task::spawn_blocking(move || run_exec_file(&extracted_dir, &exec, &[]))
            .await
            .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "installer task panicked", e.into()))?
    }

    async fn uninstall(&self, extracted_dir: &Path, state: &PackageState) -> Result<(), GooError> {
        if !state.spec.uninstall.is_set() {
            return Ok(());
        }
        let extracted_dir = extracted_dir.to_path_buf();
        let exec = state.spec.uninstall.clone();
        tokio::task::spawn_blocking(move || run_exec_file(&extracted_dir, &exec, &[]))
            .await
            .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "uninstaller task panicked", e.into()))?
    }

    async fn verify(&self, extracted_dir: &Path, spec: &PackageSpec) -> Result<(), GooError> {
        if !spec.verify.is_set() {
            return Ok(());
        }
        let extracted_dir = extracted_dir.to_path_buf();
        let exec = spec.verify.clone();
        tokio::task::spawn_blocking(move || run_exec_file(&extracted_dir, &exec, &[]))
            .await
            .map_err(|e| GooError::wrap(ErrorKind::Subprocess, "verify task panicked", e.into()))?
    }

    fn installable_archs(&self) -> Vec<SmolStr> {
        vec![SmolStr::from("noarch")]
    }

    fn app_association(&self, _spec: &PackageSpec, _local_path: &Path) -> Option<InstalledApp> {
        None
    }
}

/// Picks the concrete driver for the host this binary was built for.
pub fn default_driver() -> Box<dyn PlatformDriver> {
    #[cfg(windows)]
    {
        Box::new(WindowsDriver)
    }
    #[cfg(not(windows))]
    {
        Box::new(PortableDriver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msi_reboot_codes_are_accepted_as_ok() {
        assert!(MSI_REBOOT_CODES.contains(&3010));
        assert!(MSI_REBOOT_CODES.contains(&1641));
    }

    #[tokio::test]
    async fn portable_driver_runs_a_script_install() {
        let dir = tempfile::tempdir().unwrap();
        #[cfg(unix)]
        {
            std::fs::write(dir.path().join("install.sh"), b"#!/bin/sh\nexit 0\n").unwrap();
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path().join("install.sh"), std::fs::Permissions::from_mode(0o755)).unwrap();

            let mut spec = PackageSpec::default();
            spec.install.path = SmolStr::from("install.sh");
            let driver = PortableDriver;
            driver.install(dir.path(), &spec).await.unwrap();
        }
    }
}
