//! ssh_config text bridge.
//!
//! Converts between profile records and the line-oriented ssh_config
//! format: `Host <name>` headers followed by indented `Directive value`
//! lines. Directives this crate does not model structurally are
//! preserved verbatim so a parse/render round-trip never drops them.
//! Secrets are never read from or written to config text.

use std::fs;
use std::io;
use std::path::Path;

use crate::vault::profile::{DynamicForwardSpec, Profile, Secret, TunnelSpec};

/// Directive indentation used when rendering.
const INDENT: &str = "    ";

/// Parses ssh_config text into profiles.
///
/// A `Host` line starts a new block; subsequent directive lines
/// populate it until the next block or end of input. `Host` patterns
/// containing wildcards are match rules rather than destinations and
/// are skipped. Directives appearing before any `Host` line are
/// ignored.
#[must_use]
pub fn parse(text: &str) -> Vec<Profile> {
    let mut profiles = Vec::new();
    let mut current: Option<Profile> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (keyword, value) = split_directive(trimmed);
        if keyword.eq_ignore_ascii_case("Host") {
            if let Some(done) = current.take() {
                profiles.push(done);
            }
            current = host_alias(value).map(new_block_profile);
            continue;
        }

        let Some(profile) = current.as_mut() else {
            continue;
        };
        apply_directive(profile, keyword, value);
    }

    if let Some(done) = current.take() {
        profiles.push(done);
    }

    profiles
}

/// Renders one profile as an ssh_config block.
///
/// Modeled fields come first in a stable order, preserved unmodeled
/// directives last. Secret fields are never rendered.
#[must_use]
pub fn render(profile: &Profile) -> String {
    let mut out = String::new();
    out.push_str("Host ");
    out.push_str(&profile.host);
    out.push('\n');

    let mut directive = |keyword: &str, value: &str| {
        out.push_str(INDENT);
        out.push_str(keyword);
        out.push(' ');
        out.push_str(value);
        out.push('\n');
    };

    if !profile.hostname.is_empty() {
        directive("HostName", &profile.hostname);
    }
    if !profile.user.is_empty() {
        directive("User", &profile.user);
    }
    if let Some(port) = profile.port {
        directive("Port", &port.to_string());
    }
    if let Some(ref identity) = profile.identity_file {
        directive("IdentityFile", identity);
    }
    if let Some(ref proxy) = profile.proxy_jump {
        directive("ProxyJump", proxy);
    }
    for tunnel in &profile.tunnels {
        directive("LocalForward", &tunnel.config_value());
    }
    for forward in &profile.dynamic_forwards {
        directive("DynamicForward", &forward.to_string());
    }
    for (keyword, value) in &profile.extras {
        directive(keyword, value);
    }

    out
}

/// Renders all profiles, blocks separated by a blank line.
#[must_use]
pub fn render_all(profiles: &[Profile]) -> String {
    let blocks: Vec<String> = profiles.iter().map(render).collect();
    blocks.join("\n")
}

/// Reads and parses an ssh_config file. A missing file yields an
/// empty profile list.
pub fn load_path(path: &Path) -> io::Result<Vec<Profile>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Renders all profiles to an ssh_config file, atomically.
pub fn save_path(path: &Path, profiles: &[Profile]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, render_all(profiles))?;
    fs::rename(&temp_path, path)
}

/// Splits a directive line into keyword and value. ssh_config accepts
/// both `Keyword value` and `Keyword=value`.
fn split_directive(line: &str) -> (&str, &str) {
    let boundary = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let keyword = &line[..boundary];
    let value = line[boundary..]
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=')
        .trim_end();
    (keyword, value)
}

/// Picks the destination alias from a `Host` pattern list: the first
/// pattern without wildcards. Returns `None` for pure match rules like
/// `Host *`.
fn host_alias(value: &str) -> Option<&str> {
    value
        .split_whitespace()
        .find(|pattern| !pattern.contains(['*', '?']))
}

fn new_block_profile(host: &str) -> Profile {
    let mut profile = Profile::new(host);
    // Config text carries no secrets, so it makes no statement about
    // them either: sealed markers keep whatever the store already has.
    profile.password = Secret::Sealed;
    profile.key_passphrase = Secret::Sealed;
    profile
}

fn apply_directive(profile: &mut Profile, keyword: &str, value: &str) {
    let keep_verbatim = |profile: &mut Profile| {
        profile
            .extras
            .push((keyword.to_string(), value.to_string()));
    };

    if keyword.eq_ignore_ascii_case("HostName") {
        profile.hostname = value.to_string();
    } else if keyword.eq_ignore_ascii_case("User") {
        profile.user = value.to_string();
    } else if keyword.eq_ignore_ascii_case("Port") {
        match value.parse::<u16>() {
            Ok(port) => profile.port = Some(port),
            // Unparseable values survive as opaque text.
            Err(_) => keep_verbatim(profile),
        }
    } else if keyword.eq_ignore_ascii_case("IdentityFile") {
        profile.identity_file = Some(value.to_string());
    } else if keyword.eq_ignore_ascii_case("ProxyJump") {
        profile.proxy_jump = Some(value.to_string());
    } else if keyword.eq_ignore_ascii_case("LocalForward") {
        match TunnelSpec::from_config_value(value) {
            Ok(spec) => profile.tunnels.push(spec),
            Err(_) => keep_verbatim(profile),
        }
    } else if keyword.eq_ignore_ascii_case("DynamicForward") {
        match value.parse::<DynamicForwardSpec>() {
            Ok(spec) => profile.dynamic_forwards.push(spec),
            Err(_) => keep_verbatim(profile),
        }
    } else {
        keep_verbatim(profile);
    }
}
