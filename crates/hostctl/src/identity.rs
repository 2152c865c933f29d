//! Service identity management
//!
//! All installation work runs as one dedicated, non-interactive account.
//! The operator invokes the tool unprivileged; the manager creates the
//! account once through `sudo -n useradd` and then replaces the process
//! with the same invocation running as that account. There is no point at
//! which part of a run executes under one identity and part under another.

use crate::error::{HostError, Result};
use std::convert::Infallible;
use std::env;
use std::ffi::{CStr, CString, OsStr, OsString};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// `useradd` exit status for "username already in use"
const USERADD_EXISTS: i32 = 9;

/// Upper bound for the passwd lookup buffer
const MAX_PASSWD_BUF: usize = 1 << 20;

/// A resolved account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub username: String,
    pub home: PathBuf,
}

impl Identity {
    pub fn is_superuser(&self) -> bool {
        self.uid == 0
    }
}

/// The dedicated account all side effects run under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub username: String,
    pub home_path: PathBuf,
}

impl ServiceIdentity {
    pub fn new(username: impl Into<String>, home_path: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            home_path: home_path.into(),
        }
    }
}

/// Host account operations
pub trait AccountBackend {
    /// The effective identity of this process
    fn current(&self) -> Result<Identity>;

    fn lookup(&self, name: &str) -> Result<Option<Identity>>;

    /// Create the account; must succeed if it already exists
    fn create(&self, identity: &ServiceIdentity) -> Result<()>;

    /// Replace this process with `argv` running as `name`.
    ///
    /// Only returns on failure.
    fn exec_as(&self, name: &str, argv: &[OsString], preserve_env: &[String]) -> io::Error;
}

/// The real host: libc passwd lookups, `useradd` and `sudo` via exec
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAccounts;

impl AccountBackend for SystemAccounts {
    fn current(&self) -> Result<Identity> {
        // SAFETY: geteuid has no preconditions and cannot fail
        let uid = unsafe { libc::geteuid() };
        let found = read_passwd(&Query::Uid(uid)).map_err(|source| HostError::Lookup {
            name: uid.to_string(),
            source,
        })?;

        Ok(found.unwrap_or_else(|| {
            // Container images often run with a uid that has no passwd entry
            // SAFETY: getegid has no preconditions and cannot fail
            let gid = unsafe { libc::getegid() };
            Identity {
                uid,
                gid,
                username: uid.to_string(),
                home: env::var_os("HOME").map_or_else(|| PathBuf::from("/"), PathBuf::from),
            }
        }))
    }

    fn lookup(&self, name: &str) -> Result<Option<Identity>> {
        let c_name = CString::new(name).map_err(|_| HostError::InvalidPrincipal {
            name: name.to_string(),
            reason: "contains a NUL byte",
        })?;
        read_passwd(&Query::Name(&c_name)).map_err(|source| HostError::Lookup {
            name: name.to_string(),
            source,
        })
    }

    fn create(&self, identity: &ServiceIdentity) -> Result<()> {
        let output = Command::new("sudo")
            .args(["-n", "useradd", "--system", "--create-home", "--home-dir"])
            .arg(&identity.home_path)
            .args(["--shell", "/usr/sbin/nologin"])
            .arg(&identity.username)
            .output()
            .map_err(|e| HostError::CreateFailed {
                name: identity.username.clone(),
                message: format!("failed to execute sudo: {e}"),
            })?;

        match output.status.code() {
            Some(0) => Ok(()),
            Some(USERADD_EXISTS) => {
                log::debug!("useradd: {} already exists", identity.username);
                Ok(())
            }
            _ => Err(HostError::CreateFailed {
                name: identity.username.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn exec_as(&self, name: &str, argv: &[OsString], preserve_env: &[String]) -> io::Error {
        let mut cmd = Command::new("sudo");
        cmd.args(["-n", "-H", "-u", name]);
        if !preserve_env.is_empty() {
            cmd.arg(format!("--preserve-env={}", preserve_env.join(",")));
        }
        cmd.arg("--").args(argv);
        cmd.exec()
    }
}

enum Query<'a> {
    Uid(u32),
    Name(&'a CStr),
}

fn read_passwd(query: &Query<'_>) -> io::Result<Option<Identity>> {
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        let mut pwd: MaybeUninit<libc::passwd> = MaybeUninit::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: pwd, buf and result outlive the call and buf.len() is the
        // real capacity. pwd is only read when result is non-null.
        let rc = unsafe {
            match query {
                Query::Uid(uid) => libc::getpwuid_r(
                    *uid,
                    pwd.as_mut_ptr(),
                    buf.as_mut_ptr(),
                    buf.len(),
                    &raw mut result,
                ),
                Query::Name(name) => libc::getpwnam_r(
                    name.as_ptr(),
                    pwd.as_mut_ptr(),
                    buf.as_mut_ptr(),
                    buf.len(),
                    &raw mut result,
                ),
            }
        };

        if rc == libc::ERANGE && buf.len() < MAX_PASSWD_BUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        if result.is_null() {
            return Ok(None);
        }

        // SAFETY: a non-null result means pwd was initialized and its string
        // fields point into buf, which is still alive
        let identity = unsafe {
            let pwd = pwd.assume_init();
            Identity {
                uid: pwd.pw_uid,
                gid: pwd.pw_gid,
                username: CStr::from_ptr(pwd.pw_name).to_string_lossy().into_owned(),
                home: PathBuf::from(OsStr::from_bytes(CStr::from_ptr(pwd.pw_dir).to_bytes())),
            }
        };
        return Ok(Some(identity));
    }
}

/// This process's argv with the program replaced by its absolute path
fn invocation() -> Vec<OsString> {
    let mut argv: Vec<OsString> = env::args_os().collect();
    if let (Ok(exe), Some(program)) = (env::current_exe(), argv.first_mut()) {
        *program = exe.into_os_string();
    }
    argv
}

/// Guarantees the run executes as the service identity
pub struct PrivilegeContextManager<B = SystemAccounts> {
    backend: B,
    service: ServiceIdentity,
    argv: Vec<OsString>,
    preserve_env: Vec<String>,
    sudo_user: Option<String>,
}

impl PrivilegeContextManager<SystemAccounts> {
    /// Manager for the real host, re-executing this process's own arguments
    pub fn system(service: ServiceIdentity) -> Self {
        Self::new(service, SystemAccounts)
            .with_argv(invocation())
            .with_sudo_user(env::var("SUDO_USER").ok())
    }
}

impl<B: AccountBackend> PrivilegeContextManager<B> {
    pub fn new(service: ServiceIdentity, backend: B) -> Self {
        Self {
            backend,
            service,
            argv: Vec::new(),
            preserve_env: Vec::new(),
            sudo_user: None,
        }
    }

    /// Arguments to re-execute after the transfer (program first)
    pub fn with_argv(mut self, argv: Vec<OsString>) -> Self {
        self.argv = argv;
        self
    }

    /// Environment variables that survive the transfer
    pub fn with_preserved_env<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preserve_env = vars.into_iter().map(Into::into).collect();
        self
    }

    /// The operator that invoked `sudo`, if any
    pub fn with_sudo_user(mut self, name: Option<String>) -> Self {
        self.sudo_user = name.filter(|n| !n.is_empty());
        self
    }

    pub fn service(&self) -> &ServiceIdentity {
        &self.service
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn current_identity(&self) -> Result<Identity> {
        self.backend.current()
    }

    /// Create the service identity unless it already exists
    pub fn ensure_identity_exists(&self) -> Result<Identity> {
        let name = &self.service.username;
        if let Some(existing) = self.backend.lookup(name)? {
            log::debug!("Service identity {name} exists (uid {})", existing.uid);
            return Ok(existing);
        }

        log::info!(
            "Creating service identity {name} with home {}",
            self.service.home_path.display()
        );
        self.backend.create(&self.service)?;
        self.backend
            .lookup(name)?
            .ok_or_else(|| HostError::CreateFailed {
                name: name.clone(),
                message: "account not visible after creation".into(),
            })
    }

    /// Replace this process with `argv` running as the service identity.
    ///
    /// Returns only when the replacement could not happen.
    pub fn transfer_to(&self, argv: &[OsString]) -> Result<Infallible> {
        let name = &self.service.username;
        if argv.is_empty() {
            return Err(HostError::TransferFailed {
                name: name.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector"),
            });
        }
        log::info!("Switching to service identity {name}");
        let source = self.backend.exec_as(name, argv, &self.preserve_env);
        Err(HostError::TransferFailed {
            name: name.clone(),
            source,
        })
    }

    /// Ensure this process runs as the service identity.
    ///
    /// Returns the identity when already running as it. Otherwise creates it
    /// if needed and transfers, which does not return on success.
    pub fn enter_service_context(&self) -> Result<Identity> {
        let current = self.current_identity()?;
        if current.is_superuser() {
            return Err(HostError::Superuser);
        }
        if current.username == self.service.username {
            return Ok(current);
        }

        log::debug!(
            "Running as {} (uid {}), service identity is {}",
            current.username,
            current.uid,
            self.service.username
        );
        self.ensure_identity_exists()?;
        match self.transfer_to(&self.argv)? {}
    }

    /// The human operator behind this run
    ///
    /// After a transfer this is the account that invoked `sudo`; before it,
    /// the current account.
    pub fn operator(&self) -> Result<Identity> {
        match &self.sudo_user {
            Some(name) if *name != self.service.username => self
                .backend
                .lookup(name)?
                .ok_or_else(|| HostError::UnknownAccount { name: name.clone() }),
            _ => self.current_identity(),
        }
    }

    /// Home directory the service identity will own
    pub fn service_home(&self) -> &Path {
        &self.service.home_path
    }
}

impl<B: AccountBackend> phased::PrivilegeGate for PrivilegeContextManager<B> {
    fn enter_service_context(&self) -> phased::Result<()> {
        Self::enter_service_context(self)
            .map(|_| ())
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phased::{PhaseError, PrivilegeGate};
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn identity(uid: u32, name: &str) -> Identity {
        Identity {
            uid,
            gid: uid,
            username: name.to_string(),
            home: PathBuf::from(format!("/home/{name}")),
        }
    }

    #[derive(Default)]
    struct MockAccounts {
        current: Option<Identity>,
        accounts: RefCell<HashMap<String, Identity>>,
        created: RefCell<Vec<String>>,
        execs: RefCell<Vec<(String, Vec<OsString>, Vec<String>)>>,
        refuse_create: bool,
    }

    impl MockAccounts {
        fn running_as(current: Identity) -> Self {
            let accounts = HashMap::from([(current.username.clone(), current.clone())]);
            Self {
                current: Some(current),
                accounts: RefCell::new(accounts),
                ..Default::default()
            }
        }

        fn with_account(self, account: Identity) -> Self {
            self.accounts
                .borrow_mut()
                .insert(account.username.clone(), account);
            self
        }
    }

    impl AccountBackend for MockAccounts {
        fn current(&self) -> Result<Identity> {
            Ok(self.current.clone().unwrap())
        }

        fn lookup(&self, name: &str) -> Result<Option<Identity>> {
            Ok(self.accounts.borrow().get(name).cloned())
        }

        fn create(&self, identity: &ServiceIdentity) -> Result<()> {
            if self.refuse_create {
                return Err(HostError::CreateFailed {
                    name: identity.username.clone(),
                    message: "sudo: a password is required".into(),
                });
            }
            self.created.borrow_mut().push(identity.username.clone());
            self.accounts.borrow_mut().insert(
                identity.username.clone(),
                Identity {
                    uid: 998,
                    gid: 998,
                    username: identity.username.clone(),
                    home: identity.home_path.clone(),
                },
            );
            Ok(())
        }

        fn exec_as(&self, name: &str, argv: &[OsString], preserve_env: &[String]) -> io::Error {
            self.execs
                .borrow_mut()
                .push((name.to_string(), argv.to_vec(), preserve_env.to_vec()));
            io::Error::other("exec is disabled in tests")
        }
    }

    fn service() -> ServiceIdentity {
        ServiceIdentity::new("rigger", "/var/lib/rigger")
    }

    fn argv() -> Vec<OsString> {
        ["/usr/local/bin/rigger", "install", "--resume"]
            .into_iter()
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_superuser_refused_without_side_effects() {
        let manager =
            PrivilegeContextManager::new(service(), MockAccounts::running_as(identity(0, "root")))
                .with_argv(argv());

        let err = manager.enter_service_context().unwrap_err();
        assert!(matches!(err, HostError::Superuser));
        assert!(manager.backend().created.borrow().is_empty());
        assert!(manager.backend().execs.borrow().is_empty());
    }

    #[test]
    fn test_already_service_identity_is_noop() {
        let manager = PrivilegeContextManager::new(
            service(),
            MockAccounts::running_as(identity(998, "rigger")),
        );

        let current = manager.enter_service_context().unwrap();
        assert_eq!(current.username, "rigger");
        assert!(manager.backend().execs.borrow().is_empty());
    }

    #[test]
    fn test_operator_creates_identity_then_transfers() {
        let manager = PrivilegeContextManager::new(
            service(),
            MockAccounts::running_as(identity(1000, "alice")),
        )
        .with_argv(argv())
        .with_preserved_env(["RIGGER_STATE_DIR", "RUST_LOG"]);

        let err = manager.enter_service_context().unwrap_err();
        assert!(matches!(err, HostError::TransferFailed { .. }));

        let backend = manager.backend();
        assert_eq!(*backend.created.borrow(), vec!["rigger"]);
        let execs = backend.execs.borrow();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].0, "rigger");
        assert_eq!(execs[0].1, argv());
        assert_eq!(execs[0].2, vec!["RIGGER_STATE_DIR", "RUST_LOG"]);
    }

    #[test]
    fn test_existing_identity_is_reused() {
        let backend = MockAccounts::running_as(identity(1000, "alice"))
            .with_account(identity(998, "rigger"));
        let manager = PrivilegeContextManager::new(service(), backend).with_argv(argv());

        let _ = manager.enter_service_context();
        assert!(manager.backend().created.borrow().is_empty());
        assert_eq!(manager.backend().execs.borrow().len(), 1);
    }

    #[test]
    fn test_ensure_identity_exists_is_idempotent() {
        let manager = PrivilegeContextManager::new(
            service(),
            MockAccounts::running_as(identity(1000, "alice")),
        );

        let first = manager.ensure_identity_exists().unwrap();
        let second = manager.ensure_identity_exists().unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.backend().created.borrow().len(), 1);
    }

    #[test]
    fn test_creation_failure_prevents_transfer() {
        let backend = MockAccounts {
            refuse_create: true,
            ..MockAccounts::running_as(identity(1000, "alice"))
        };
        let manager = PrivilegeContextManager::new(service(), backend).with_argv(argv());

        let err = manager.enter_service_context().unwrap_err();
        assert!(matches!(err, HostError::CreateFailed { .. }));
        assert!(manager.backend().execs.borrow().is_empty());
    }

    #[test]
    fn test_transfer_with_empty_argv_fails() {
        let manager = PrivilegeContextManager::new(
            service(),
            MockAccounts::running_as(identity(1000, "alice")),
        );
        assert!(manager.transfer_to(&[]).is_err());
        assert!(manager.backend().execs.borrow().is_empty());
    }

    #[test]
    fn test_operator_from_sudo_user() {
        let backend = MockAccounts::running_as(identity(998, "rigger"))
            .with_account(identity(1000, "alice"));
        let manager = PrivilegeContextManager::new(service(), backend)
            .with_sudo_user(Some("alice".into()));

        assert_eq!(manager.operator().unwrap().uid, 1000);
    }

    #[test]
    fn test_operator_defaults_to_current() {
        let manager = PrivilegeContextManager::new(
            service(),
            MockAccounts::running_as(identity(1000, "alice")),
        )
        .with_sudo_user(Some(String::new()));

        assert_eq!(manager.operator().unwrap().username, "alice");
    }

    #[test]
    fn test_gate_maps_errors() {
        let root =
            PrivilegeContextManager::new(service(), MockAccounts::running_as(identity(0, "root")));
        assert!(matches!(
            PrivilegeGate::enter_service_context(&root),
            Err(PhaseError::SuperuserRefused)
        ));

        let alice = PrivilegeContextManager::new(
            service(),
            MockAccounts::running_as(identity(1000, "alice")),
        )
        .with_argv(argv());
        assert!(matches!(
            PrivilegeGate::enter_service_context(&alice),
            Err(PhaseError::PrivilegeTransferFailed { .. })
        ));
    }

    #[test]
    fn test_system_lookup_of_missing_account() {
        let found = SystemAccounts
            .lookup("rigger-test-account-that-does-not-exist")
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_system_current_resolves() {
        let current = SystemAccounts.current().unwrap();
        assert!(!current.username.is_empty());
    }
}
