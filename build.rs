use rsconf::Target;
use std::error::Error;

fn main() {
    rsconf::rebuild_if_paths_changed(&["src", "Cargo.toml", "build.rs"]);

    let build = cc::Build::new();
    let mut target = Target::new_from(build).unwrap();
    target.set_verbose(true);
    detect_cfgs(&mut target);
}

/// Check target system support for the few platform features we care about.
///
/// These are exposed as cfgs rather than cargo features: they describe what the platform can do,
/// not something a user would toggle.
#[rustfmt::skip]
fn detect_cfgs(target: &mut Target) {
    let checks: [(&str, &dyn Fn(&Target) -> Result<bool, Box<dyn Error>>); 3] = [
        ("apple", &detect_apple),
        ("bsd", &detect_bsd),
        ("have_pipe2", &|target| {
            Ok(target.has_symbol("pipe2"))
        }),
    ];
    for (name, handler) in checks {
        match handler(target) {
            Err(e) => {
                rsconf::warn!("{}: {}", name, e);
                rsconf::declare_cfg(name, false);
            },
            Ok(enabled) => rsconf::declare_cfg(name, enabled),
        }
    }
}

fn detect_apple(_: &Target) -> Result<bool, Box<dyn Error>> {
    Ok(cfg!(any(target_os = "ios", target_os = "macos")))
}

/// Detect if we're being compiled for a BSD-derived OS, allowing targeting code conditionally with
/// `#[cfg(bsd)]`.
fn detect_bsd(_: &Target) -> Result<bool, Box<dyn Error>> {
    // Inspect TARGET rather than the host so cross-compilation works.
    let target = std::env::var("TARGET")?.to_ascii_lowercase();
    Ok(target.ends_with("bsd") || target.ends_with("dragonfly"))
}
