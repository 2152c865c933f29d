use anyhow::Result;
use std::ffi::OsString;
use std::path::Path;

use crate::runner;

/// Produces a certificate and private key
pub trait TlsGenerator {
    fn generate(&self, subject: &str, days: u32, cert: &Path, key: &Path) -> Result<()>;
}

/// Self-signed material via `openssl req -x509`
pub struct OpenSsl;

impl OpenSsl {
    fn args(subject: &str, days: u32, cert: &Path, key: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "req", "-x509", "-newkey", "rsa:4096", "-sha256", "-nodes", "-days",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(days.to_string().into());
        args.push("-subj".into());
        args.push(subject.into());
        args.push("-keyout".into());
        args.push(key.as_os_str().to_owned());
        args.push("-out".into());
        args.push(cert.as_os_str().to_owned());
        args
    }
}

impl TlsGenerator for OpenSsl {
    fn generate(&self, subject: &str, days: u32, cert: &Path, key: &Path) -> Result<()> {
        log::info!("Generating self-signed certificate for {subject} ({days} days)");
        runner::run_capture("openssl", &Self::args(subject, days, cert, key)).map(|_| ())
    }
}
