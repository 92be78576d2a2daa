//! Implementation of the `doctor` diagnostics used by the CLI.
//!
//! The doctor runs an ordered set of independent checks over a loaded
//! configuration snapshot and the live environment. Each check returns zero
//! or more results (zero meaning "not applicable here"), each result carries
//! an identifier, a status, and a summary explaining it, and the overall
//! status is aggregated across all results. A check converts every failure
//! mode it can hit into a result; nothing a check does can abort the run.

use crate::config::{self, Config, ConfigError};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

/// Passwords shorter than this are flagged as weak (warn, not fail).
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub id: String,
    pub status: CheckStatus,
    pub summary: String,
}

fn mk(id: &str, status: CheckStatus, summary: impl Into<String>) -> CheckResult {
    CheckResult {
        id: id.to_string(),
        status,
        summary: summary.into(),
    }
}

/// Configuration snapshot handed to every check.
///
/// Checks that need configuration keys degrade to no results when the load
/// failed; only `cfg.load` reports the failure itself.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub config: Result<&'a (Config, PathBuf), &'a ConfigError>,
}

impl<'a> CheckContext<'a> {
    pub fn loaded(&self) -> Option<&'a Config> {
        self.config.ok().map(|(cfg, _)| cfg)
    }
}

pub type CheckFn = fn(&CheckContext) -> Vec<CheckResult>;

/// Ordered list of checks; order affects report readability only.
pub struct CheckRunner {
    checks: Vec<CheckFn>,
}

impl CheckRunner {
    pub fn new(checks: Vec<CheckFn>) -> Self {
        Self { checks }
    }

    pub fn with_default_checks() -> Self {
        Self::new(vec![
            check_config_readable,
            check_tls_acme_exclusive,
            check_tls_files,
            check_port_availability,
            check_udp_buffers,
            check_auth_config,
        ])
    }

    pub fn run(&self, ctx: &CheckContext) -> DoctorReport {
        let mut checks: Vec<CheckResult> = Vec::new();
        for check in &self.checks {
            checks.extend(check(ctx));
        }
        DoctorReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            overall: aggregate_overall(&checks),
            checks,
        }
    }
}

fn aggregate_overall(checks: &[CheckResult]) -> CheckStatus {
    // fail > warn > ok
    checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(CheckStatus::Ok)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Degraded,
    Broken,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub version: String,
    pub overall: CheckStatus,
    pub checks: Vec<CheckResult>,
}

impl DoctorReport {
    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    pub fn warn_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warn)
            .count()
    }

    /// Drives process exit signaling: warnings never fail a run.
    pub fn has_failures(&self) -> bool {
        self.fail_count() > 0
    }

    pub fn verdict(&self) -> Verdict {
        if self.has_failures() {
            Verdict::Broken
        } else if self.warn_count() > 0 {
            Verdict::Degraded
        } else {
            Verdict::Healthy
        }
    }

    pub fn verdict_line(&self) -> String {
        match self.verdict() {
            Verdict::Healthy => "all checks passed".to_string(),
            Verdict::Degraded => format!("ok with {} warning(s)", self.warn_count()),
            Verdict::Broken => format!(
                "{} error(s), {} warning(s) found; fix the failures above",
                self.fail_count(),
                self.warn_count()
            ),
        }
    }

    /// One line per result, then the verdict line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            out.push_str(&format!(
                "  {:<4} [{}] {}\n",
                check.status, check.id, check.summary
            ));
        }
        out.push('\n');
        out.push_str(&self.verdict_line());
        out.push('\n');
        out
    }
}

/// Loads the configuration and runs the default checks against it.
pub fn run_doctor() -> DoctorReport {
    let cfg_res = config::load_config();
    let ctx = CheckContext {
        config: cfg_res.as_ref(),
    };
    CheckRunner::with_default_checks().run(&ctx)
}

fn check_config_readable(ctx: &CheckContext) -> Vec<CheckResult> {
    match ctx.config {
        Ok((_, path)) => vec![mk(
            "cfg.load",
            CheckStatus::Ok,
            format!("configuration loaded from {}", path.display()),
        )],
        Err(err) => vec![mk("cfg.load", CheckStatus::Fail, err.to_string())],
    }
}

fn check_tls_acme_exclusive(ctx: &CheckContext) -> Vec<CheckResult> {
    let Some(cfg) = ctx.loaded() else {
        return Vec::new();
    };

    let result = match (cfg.tls.is_some(), cfg.acme.is_some()) {
        (true, true) => mk(
            "tls.mode",
            CheckStatus::Fail,
            "both 'tls' and 'acme' are set; configure one or the other, not both",
        ),
        (false, false) => mk(
            "tls.mode",
            CheckStatus::Fail,
            "neither 'tls' nor 'acme' is configured; one is required before the gateway can start",
        ),
        (true, false) => mk(
            "tls.mode",
            CheckStatus::Ok,
            "static certificate mode: using local certificate files",
        ),
        (false, true) => mk(
            "tls.mode",
            CheckStatus::Ok,
            "acme mode: using automatic certificate provisioning",
        ),
    };
    vec![result]
}

fn check_tls_files(ctx: &CheckContext) -> Vec<CheckResult> {
    let Some(cfg) = ctx.loaded() else {
        return Vec::new();
    };
    // ACME mode has no files to check.
    let Some(tls) = cfg.tls.as_ref() else {
        return Vec::new();
    };

    let cert_path = tls.cert.as_deref().unwrap_or("");
    let key_path = tls.key.as_deref().unwrap_or("");
    let mut results = Vec::new();

    let cert_ok = if cert_path.is_empty() {
        results.push(mk("tls.cert", CheckStatus::Fail, "tls.cert path is empty"));
        false
    } else {
        let result = check_file_readable("tls.cert", cert_path);
        let ok = result.status == CheckStatus::Ok;
        results.push(result);
        ok
    };

    let key_ok = if key_path.is_empty() {
        results.push(mk("tls.key", CheckStatus::Fail, "tls.key path is empty"));
        false
    } else {
        let result = check_file_readable("tls.key", key_path);
        let ok = result.status == CheckStatus::Ok;
        results.push(result);
        ok
    };

    // Per-file results first so operators see which file is broken before
    // learning the pair does not match.
    if cert_ok && key_ok {
        results.push(check_key_pair(cert_path, key_path));
    }

    results
}

fn check_file_readable(id: &str, path: &str) -> CheckResult {
    let meta = match fs::metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return mk(id, CheckStatus::Fail, format!("file not found: {}", path));
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return mk(id, CheckStatus::Fail, format!("permission denied on {}", path));
        }
        Err(e) => {
            return mk(
                id,
                CheckStatus::Fail,
                format!("error accessing {}: {}", path, e),
            );
        }
        Ok(meta) => meta,
    };

    if let Err(e) = fs::File::open(path) {
        return mk(id, CheckStatus::Fail, format!("cannot open {}: {}", path, e));
    }

    if meta.len() == 0 {
        return mk(id, CheckStatus::Fail, format!("file is empty: {}", path));
    }

    mk(
        id,
        CheckStatus::Ok,
        format!("readable ({} bytes): {}", meta.len(), path),
    )
}

fn check_key_pair(cert_path: &str, key_path: &str) -> CheckResult {
    match load_key_pair(Path::new(cert_path), Path::new(key_path)) {
        Ok(()) => mk(
            "tls.pair",
            CheckStatus::Ok,
            "certificate and key pair loaded",
        ),
        Err(e) => mk(
            "tls.pair",
            CheckStatus::Fail,
            format!("certificate/key pair is invalid: {}", e),
        ),
    }
}

fn load_key_pair(cert_path: &Path, key_path: &Path) -> Result<(), String> {
    let cert_data = fs::read(cert_path)
        .map_err(|e| format!("failed to read {}: {}", cert_path.display(), e))?;
    let certs = CertificateDer::pem_slice_iter(&cert_data)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("failed to parse certificates from {}: {}", cert_path.display(), e))?;
    if certs.is_empty() {
        return Err(format!("no certificates found in {}", cert_path.display()));
    }

    let key = PrivateKeyDer::from_pem_file(key_path)
        .map_err(|e| format!("failed to parse private key from {}: {}", key_path.display(), e))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn check_port_availability(ctx: &CheckContext) -> Vec<CheckResult> {
    let Some(cfg) = ctx.loaded() else {
        return Vec::new();
    };

    let listen = cfg.listen_str();
    let addr = match config::resolve_listen_addr(listen) {
        Ok(addr) => addr,
        // Without a resolvable endpoint there is nothing further to probe.
        Err(err) => return vec![mk("net.udp_port", CheckStatus::Fail, err)],
    };

    let result = match UdpSocket::bind(addr) {
        Ok(socket) => {
            // Release immediately: the gateway itself binds this port next.
            drop(socket);
            mk(
                "net.udp_port",
                CheckStatus::Ok,
                format!("udp {} is available", listen),
            )
        }
        Err(err) => classify_bind_error(listen, &err),
    };
    vec![result]
}

fn classify_bind_error(listen: &str, err: &io::Error) -> CheckResult {
    match err.kind() {
        io::ErrorKind::AddrInUse => mk(
            "net.udp_port",
            CheckStatus::Fail,
            format!(
                "udp {} is already in use; another process (a second gateway instance?) is bound to it",
                listen
            ),
        ),
        io::ErrorKind::PermissionDenied => mk(
            "net.udp_port",
            CheckStatus::Fail,
            format!(
                "permission denied binding udp {}; use a port above 1024 or run with elevated privileges",
                listen
            ),
        ),
        _ => mk(
            "net.udp_port",
            CheckStatus::Fail,
            format!("cannot bind udp {}: {}", listen, err),
        ),
    }
}

fn check_udp_buffers(_ctx: &CheckContext) -> Vec<CheckResult> {
    #[cfg(target_os = "linux")]
    {
        let mut results = Vec::new();
        if let Some(value) = read_sysctl_bytes("/proc/sys/net/core/rmem_max") {
            results.push(check_buffer_ceiling("sys.rmem_max", value));
        }
        if let Some(value) = read_sysctl_bytes("/proc/sys/net/core/wmem_max") {
            results.push(check_buffer_ceiling("sys.wmem_max", value));
        }
        if results.is_empty() {
            results.push(mk(
                "sys.udp_buffers",
                CheckStatus::Warn,
                "could not read kernel buffer ceilings; run 'sysctl net.core.rmem_max' manually",
            ));
        }
        results
    }
    #[cfg(not(target_os = "linux"))]
    {
        vec![mk(
            "sys.udp_buffers",
            CheckStatus::Warn,
            format!(
                "kernel buffer check only runs on linux (current os: {})",
                std::env::consts::OS
            ),
        )]
    }
}

#[cfg(target_os = "linux")]
fn read_sysctl_bytes(path: &str) -> Option<usize> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn check_buffer_ceiling(id: &str, value: usize) -> CheckResult {
    let recommended = crate::buffers::RECOMMENDED_BUFFER_BYTES;
    if value >= recommended {
        mk(
            id,
            CheckStatus::Ok,
            format!("{} bytes (>= {} recommended)", value, recommended),
        )
    } else {
        mk(
            id,
            CheckStatus::Warn,
            format!(
                "{} bytes (< {} recommended); raise it with sysctl for full throughput",
                value, recommended
            ),
        )
    }
}

fn check_auth_config(ctx: &CheckContext) -> Vec<CheckResult> {
    let Some(cfg) = ctx.loaded() else {
        return Vec::new();
    };

    let Some(auth) = cfg.auth.as_ref() else {
        return vec![mk(
            "auth.config",
            CheckStatus::Fail,
            "no auth.type configured; the gateway requires authentication",
        )];
    };
    let kind = auth.kind.as_deref().unwrap_or("").trim();
    if kind.is_empty() {
        return vec![mk(
            "auth.config",
            CheckStatus::Fail,
            "no auth.type configured; the gateway requires authentication",
        )];
    }

    let result = match kind.to_ascii_lowercase().as_str() {
        "password" => {
            let password = auth.password.as_deref().unwrap_or("");
            if password.is_empty() {
                mk(
                    "auth.config",
                    CheckStatus::Fail,
                    "auth.type is 'password' but auth.password is empty",
                )
            } else if password.chars().count() < MIN_PASSWORD_LEN {
                mk(
                    "auth.config",
                    CheckStatus::Warn,
                    format!(
                        "auth.password is shorter than {} characters; use a stronger password",
                        MIN_PASSWORD_LEN
                    ),
                )
            } else {
                mk(
                    "auth.config",
                    CheckStatus::Ok,
                    "password authentication configured",
                )
            }
        }
        "userpass" => match auth.userpass.as_ref() {
            Some(users) if !users.is_empty() => mk(
                "auth.config",
                CheckStatus::Ok,
                format!("user/pass authentication configured ({} users)", users.len()),
            ),
            _ => mk(
                "auth.config",
                CheckStatus::Fail,
                "auth.type is 'userpass' but no user:password entries are present",
            ),
        },
        "http" | "https" => {
            let url = auth
                .http
                .as_ref()
                .and_then(|h| h.url.as_deref())
                .unwrap_or("");
            if url.is_empty() {
                mk(
                    "auth.config",
                    CheckStatus::Fail,
                    "auth.type is 'http' but auth.http.url is empty",
                )
            } else {
                mk(
                    "auth.config",
                    CheckStatus::Ok,
                    format!("http authentication configured: {}", url),
                )
            }
        }
        // Unknown types are accepted; only the known ones are validated
        // strictly.
        other => mk(
            "auth.config",
            CheckStatus::Ok,
            format!("authentication type: {}", other),
        ),
    };
    vec![result]
}
