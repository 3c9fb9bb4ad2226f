//! Host platform to repository platform tag mapping.

/// Map an operating system / architecture pair to the platform tag used
/// in repository listings.
///
/// Returns an empty string for any combination no repository publishes
/// binaries for (e.g. arm); the locator treats that as "no compatible
/// binary for this platform".
pub fn platform_tag(os: &str, arch: &str) -> &'static str {
    match (os, arch) {
        ("linux", "amd64") => "linux64",
        ("linux", "386") => "linux32",
        ("windows", "amd64") => "win64",
        ("windows", "386") => "win32",
        // Repositories publish a single darwin artifact.
        ("darwin", _) => "osx",
        _ => "",
    }
}

/// The platform tag for the running host.
pub fn current_platform_tag() -> &'static str {
    platform_tag(normalize_os(std::env::consts::OS), normalize_arch(std::env::consts::ARCH))
}

fn normalize_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        other => other,
    }
}
