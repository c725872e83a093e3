//! sshvault - Main entry point.
//!
//! A thin command-line driver over the encrypted profile store.
//!
//! Usage: sshv <COMMAND> [ARGS]
//!
//! Commands:
//!   list                          List saved profiles
//!   show <host> [--secrets]      Show one profile
//!   add <host> [hostname]        Create a profile
//!   set <host> <field> [value]   Set or clear one field
//!   rename <old> <new>           Rename a profile
//!   copy <src> <new>             Duplicate a profile
//!   remove <host>                Delete a profile
//!   import [path]                Import hosts from an ssh_config file
//!   export [host]                Render profiles as ssh_config text
//!
//! Options:
//!   --version, -v    Show version

use std::env;
use std::path::PathBuf;
use std::process;

use sshvault::config::Settings;
use sshvault::sshconfig;
use sshvault::vault::{KeyFile, Profile, ProfileStore, Secret, StoreError, TunnelSpec};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "\
Usage: sshv <COMMAND> [ARGS]

Commands:
  list                          List saved profiles
  show <host> [--secrets]      Show one profile
  add <host> [hostname]        Create a profile
  set <host> <field> [value]   Set or clear one field
  rename <old> <new>           Rename a profile
  copy <src> <new>             Duplicate a profile
  remove <host>                Delete a profile
  import [path]                Import hosts from an ssh_config file
  export [host]                Render profiles as ssh_config text

Fields for `set`: hostname, user, port, identity, proxy, folder, note,
password, passphrase, tunnels, socks. Omit the value to clear.
";

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("sshvault v{}", VERSION);
        return;
    }

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = sshvault::logging::init(&settings.log_config) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let keys = match settings.key_path.clone() {
        Some(path) => KeyFile::with_path(path),
        None => KeyFile::new(),
    };
    let store = match settings.store_path.clone() {
        Some(path) => ProfileStore::with_path(path, keys),
        None => ProfileStore::new(keys),
    };

    if let Err(e) = run(&args, &settings, &store) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: &[String], settings: &Settings, store: &ProfileStore) -> Result<(), StoreError> {
    let mut words = args.iter().map(String::as_str);

    match words.next() {
        Some("list") => list(store),
        Some("show") => {
            let host = require(words.next())?;
            let secrets = args.iter().any(|a| a == "--secrets");
            show(store, host, secrets)
        }
        Some("add") => {
            let host = require(words.next())?;
            add(store, host, words.next())
        }
        Some("set") => {
            let host = require(words.next())?;
            let field = require(words.next())?;
            set_field(store, host, field, words.next())
        }
        Some("rename") => {
            let old = require(words.next())?;
            let new = require(words.next())?;
            store.rename(old, new)
        }
        Some("copy") => {
            let src = require(words.next())?;
            let new = require(words.next())?;
            store.duplicate(src, new)
        }
        Some("remove") => {
            let host = require(words.next())?;
            store.remove(host)
        }
        Some("import") => {
            let path = words
                .next()
                .map(PathBuf::from)
                .unwrap_or_else(|| settings.effective_ssh_config_path());
            import(store, &path)
        }
        Some("export") => export(store, words.next()),
        _ => {
            print!("{}", USAGE);
            Ok(())
        }
    }
}

fn require(arg: Option<&str>) -> Result<&str, StoreError> {
    arg.ok_or(StoreError::EmptyHost)
}

fn list(store: &ProfileStore) -> Result<(), StoreError> {
    let profiles = store.list()?;
    if profiles.is_empty() {
        println!("No profiles saved.");
        return Ok(());
    }

    for profile in profiles {
        let folder = profile
            .folder
            .as_deref()
            .map(|f| format!("[{}] ", f))
            .unwrap_or_default();
        let lock = if profile.has_secrets() { " *" } else { "" };
        println!(
            "{}{}  {}{}",
            folder,
            profile.host,
            profile.connection_string(),
            lock
        );
    }
    Ok(())
}

fn show(store: &ProfileStore, host: &str, secrets: bool) -> Result<(), StoreError> {
    let profile = store.get(host, secrets)?;

    println!("Host:       {}", profile.host);
    println!("Target:     {}", profile.connection_string());
    println!("Port:       {}", profile.effective_port());
    if let Some(ref identity) = profile.identity_file {
        println!("Identity:   {}", identity);
    }
    if let Some(ref proxy) = profile.proxy_jump {
        println!("ProxyJump:  {}", proxy);
    }
    if let Some(ref folder) = profile.folder {
        println!("Folder:     {}", folder);
    }
    for tunnel in &profile.tunnels {
        println!("Tunnel:     {}", tunnel);
    }
    for forward in &profile.dynamic_forwards {
        println!("Socks:      {}", forward);
    }
    if let Some(ref note) = profile.note {
        println!("Note:       {}", note);
    }

    match (&profile.password, secrets) {
        (Secret::Plain(value), true) => println!("Password:   {}", value),
        (Secret::Sealed, false) => println!("Password:   (stored)"),
        _ => {}
    }
    match (&profile.key_passphrase, secrets) {
        (Secret::Plain(value), true) => println!("Passphrase: {}", value),
        (Secret::Sealed, false) => println!("Passphrase: (stored)"),
        _ => {}
    }

    Ok(())
}

fn add(store: &ProfileStore, host: &str, hostname: Option<&str>) -> Result<(), StoreError> {
    if store.contains(host)? {
        return Err(StoreError::AlreadyExists(host.to_string()));
    }

    let mut profile = Profile::new(host);
    profile.hostname = hostname.unwrap_or_default().to_string();
    store.upsert(&profile)?;
    println!("Added profile '{}'.", host);
    Ok(())
}

fn set_field(
    store: &ProfileStore,
    host: &str,
    field: &str,
    value: Option<&str>,
) -> Result<(), StoreError> {
    match field {
        "password" => store.set_password(host, value)?,
        "passphrase" => store.set_key_passphrase(host, value)?,
        "proxy" => store.set_proxy(host, value)?,
        "folder" => store.set_folder(host, value)?,
        "note" => store.set_note(host, value)?,
        "tunnels" => {
            let specs = parse_list::<TunnelSpec>(value)?;
            store.set_tunnels(host, &specs)?;
        }
        "socks" => {
            let specs = parse_list(value)?;
            store.set_dynamic_forwards(host, &specs)?;
        }
        // Plain connection fields go through read-merge so stored
        // secrets stay untouched.
        "hostname" | "user" | "port" | "identity" => {
            let mut profile = store.get(host, false)?;
            match field {
                "hostname" => profile.hostname = value.unwrap_or_default().to_string(),
                "user" => profile.user = value.unwrap_or_default().to_string(),
                "port" => {
                    profile.port = match value {
                        Some(raw) => Some(raw.parse().map_err(|_| {
                            StoreError::Spec(sshvault::vault::SpecParseError::InvalidPort(
                                raw.to_string(),
                            ))
                        })?),
                        None => None,
                    };
                }
                _ => profile.identity_file = value.map(str::to_string),
            }
            store.upsert(&profile)?;
        }
        other => {
            eprintln!("Unknown field '{}'.", other);
            print!("{}", USAGE);
            return Ok(());
        }
    }

    println!("Updated '{}'.", host);
    Ok(())
}

fn parse_list<T>(value: Option<&str>) -> Result<Vec<T>, StoreError>
where
    T: std::str::FromStr<Err = sshvault::vault::SpecParseError>,
{
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(StoreError::Spec))
        .collect()
}

fn import(store: &ProfileStore, path: &PathBuf) -> Result<(), StoreError> {
    let profiles = sshconfig::load_path(path)?;
    let count = profiles.len();

    for profile in &profiles {
        store.upsert(profile)?;
    }

    println!("Imported {} profile(s) from {}.", count, path.display());
    Ok(())
}

fn export(store: &ProfileStore, host: Option<&str>) -> Result<(), StoreError> {
    match host {
        Some(host) => {
            let profile = store.get(host, false)?;
            print!("{}", sshconfig::render(&profile));
        }
        None => {
            let profiles = store.list()?;
            print!("{}", sshconfig::render_all(&profiles));
        }
    }
    Ok(())
}
