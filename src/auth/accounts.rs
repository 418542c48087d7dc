//! Account store
//!
//! The chat core only needs three questions answered about accounts: does a
//! username exist, what is its password, and register a new one. The
//! [`AccountStore`] trait is that seam; [`FileAccountStore`] keeps records as
//! `username:password` lines and [`MemoryAccountStore`] backs tests.
//!
//! Passwords are stored and compared in plain text, matching the flat file
//! format clients already have.

use log::{info, warn};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const RECORD_SEPARATOR: char = ':';

pub trait AccountStore {
    fn contains(&self, username: &str) -> bool;

    fn password(&self, username: &str) -> Option<&str>;

    /// Persists a new account. Callers check `contains` first.
    fn register(&mut self, username: &str, password: &str) -> io::Result<()>;
}

/// Accounts held in memory and appended to a flat file on registration
pub struct FileAccountStore {
    path: PathBuf,
    accounts: HashMap<String, String>,
}

impl FileAccountStore {
    /// Loads every record from `path`, creating an empty file when missing.
    ///
    /// Lines without a separator or with an empty field are skipped.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            File::create(&path)?;
            info!("Created empty account store at {}", path.display());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut accounts = HashMap::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once(RECORD_SEPARATOR) {
                Some((username, password)) if !username.is_empty() && !password.is_empty() => {
                    accounts.insert(username.to_string(), password.to_string());
                }
                _ => warn!(
                    "Skipping malformed account record on line {} of {}",
                    index + 1,
                    path.display()
                ),
            }
        }

        info!(
            "Loaded {} account(s) from {}",
            accounts.len(),
            path.display()
        );

        Ok(Self { path, accounts })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountStore for FileAccountStore {
    fn contains(&self, username: &str) -> bool {
        self.accounts.contains_key(username)
    }

    fn password(&self, username: &str) -> Option<&str> {
        self.accounts.get(username).map(String::as_str)
    }

    fn register(&mut self, username: &str, password: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{username}{RECORD_SEPARATOR}{password}")?;
        file.flush()?;

        self.accounts
            .insert(username.to_string(), password.to_string());
        info!("Registered new account: {username}");
        Ok(())
    }
}

/// Volatile store, nothing touches the disk
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: HashMap<String, String>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, username: &str, password: &str) -> Self {
        self.accounts
            .insert(username.to_string(), password.to_string());
        self
    }
}

impl AccountStore for MemoryAccountStore {
    fn contains(&self, username: &str) -> bool {
        self.accounts.contains_key(username)
    }

    fn password(&self, username: &str) -> Option<&str> {
        self.accounts.get(username).map(String::as_str)
    }

    fn register(&mut self, username: &str, password: &str) -> io::Result<()> {
        self.accounts
            .insert(username.to_string(), password.to_string());
        Ok(())
    }
}
