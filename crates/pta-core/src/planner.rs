//! Command Planner (spec §4.C): turns a task descriptor plus a target
//! platform into an executable, argument vector, environment, and stdin
//! payload.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{FileEntry, InputMethod, TaskDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    fn separator(self) -> char {
        match self {
            Platform::Unix => '/',
            Platform::Windows => '\\',
        }
    }

    /// Join path segments using this platform's separator, regardless of
    /// the separator the host running the planner actually uses. A plan's
    /// argv is a string handed to a task process on `self`, not a
    /// `std::path::Path` on the compiling host, so `Path`/`PathBuf` (whose
    /// behavior is fixed at compile time by the host target) would silently
    /// produce the wrong string when planning for the other platform in
    /// tests.
    fn join(self, base: &str, segments: &[&str]) -> String {
        let sep = self.separator();
        let mut out = base.trim_end_matches(sep).to_string();
        for segment in segments {
            out.push(sep);
            out.push_str(segment);
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("task descriptor has no files")]
    NoFiles,
    #[error("input is not valid JSON for input method {method:?}: {source}")]
    InvalidEnvironmentInput {
        method: InputMethod,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub argv: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub stdin: Option<String>,
}

/// Where cached files live and where the wrapper binary/shim scripts are
/// installed, expressed as plain strings rather than `PathBuf` since the
/// planner may target a platform other than the one it runs on (every
/// unit test for the Windows branches runs on whatever host happens to be
/// compiling this crate).
pub struct PlannerRoots {
    pub cache_dir: String,
    pub binary_root: String,
}

impl PlannerRoots {
    pub fn wrapper_path(&self, platform: Platform) -> String {
        let name = match platform {
            Platform::Windows => "task_wrapper.exe",
            Platform::Unix => "task_wrapper",
        };
        platform.join(&self.binary_root, &[name])
    }

    fn shim_path(&self, platform: Platform) -> String {
        platform.join(&self.binary_root, &["PowershellShim.ps1"])
    }

    fn cached_path(&self, platform: Platform, file: &FileEntry) -> String {
        platform.join(&self.cache_dir, &[&file.sha256, &file.filename])
    }
}

fn extension_of(filename: &str) -> Option<&str> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
}

fn resolve_input_method(descriptor: &TaskDescriptor) -> InputMethod {
    if let Some(method) = descriptor.input_method {
        return method;
    }
    match descriptor.files.first().and_then(|f| extension_of(&f.filename)) {
        Some("ps1") => InputMethod::Powershell,
        _ => InputMethod::Both,
    }
}

fn platform_argv_prefix(platform: Platform, path: &str, extension: Option<&str>) -> Vec<String> {
    if platform == Platform::Unix {
        return vec![path.to_string()];
    }
    match extension {
        Some("rb") => vec!["ruby".to_string(), path.to_string()],
        Some("pp") => vec!["puppet".to_string(), "apply".to_string(), path.to_string()],
        Some("ps1") => vec![
            "powershell".to_string(),
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-NoLogo".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-File".to_string(),
            path.to_string(),
        ],
        _ => vec![path.to_string()],
    }
}

/// Build the executable plan for `descriptor` on `platform`, given where
/// its files are cached and where the wrapper/shim live.
pub fn plan(
    descriptor: &TaskDescriptor,
    platform: Platform,
    roots: &PlannerRoots,
) -> Result<Plan, PlannerError> {
    let first_file = descriptor.files.first().ok_or(PlannerError::NoFiles)?;
    let path_str = roots.cached_path(platform, first_file);
    let extension = extension_of(&first_file.filename);

    let method = resolve_input_method(descriptor);

    let mut argv = platform_argv_prefix(platform, &path_str, extension);
    if method == InputMethod::Powershell {
        argv.insert(0, roots.shim_path(platform));
    }

    // Environment keys off the caller-supplied method directly, not the
    // resolved argv method: an unset `input_method` behaves like `both`
    // here even when the `.ps1` extension resolved it to `powershell` for
    // argv/shim purposes, so a powershell task with no explicit method
    // still receives its `PT_*` variables.
    let env_method = descriptor.input_method.unwrap_or(InputMethod::Both);
    let environment = match env_method {
        InputMethod::Both | InputMethod::Environment => {
            let map = descriptor.input_as_string_map().map_err(|source| {
                PlannerError::InvalidEnvironmentInput {
                    method: env_method,
                    source,
                }
            })?;
            map.into_iter().map(|(k, v)| (format!("PT_{k}"), v)).collect()
        }
        _ => BTreeMap::new(),
    };

    let stdin = match method {
        InputMethod::Both | InputMethod::Stdin | InputMethod::Powershell => {
            Some(descriptor.input.clone())
        }
        InputMethod::Environment => None,
    };

    Ok(Plan {
        argv,
        environment,
        stdin,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap as Map;

    use pta_transport::FileUri;

    use super::*;

    fn file(name: &str) -> FileEntry {
        FileEntry {
            filename: name.to_string(),
            sha256: "abc".to_string(),
            size_bytes: 0,
            uri: FileUri {
                path: String::new(),
                params: Map::new(),
            },
        }
    }

    fn roots(cache_dir: &str, binary_root: &str) -> PlannerRoots {
        PlannerRoots {
            cache_dir: cache_dir.to_string(),
            binary_root: binary_root.to_string(),
        }
    }

    #[test]
    fn unix_shell_task_with_stdin_input() {
        let mut f = file("hello.sh");
        f.sha256 = "abc".to_string();
        let descriptor = TaskDescriptor {
            task: "m::hello".to_string(),
            files: vec![f],
            input: "{\"name\":\"x\"}".to_string(),
            input_method: Some(InputMethod::Stdin),
        };
        let plan = plan(&descriptor, Platform::Unix, &roots("/cache", "/opt/bin")).unwrap();
        assert_eq!(plan.argv, vec!["/cache/abc/hello.sh".to_string()]);
        assert!(plan.environment.is_empty());
        assert_eq!(plan.stdin.as_deref(), Some("{\"name\":\"x\"}"));
    }

    #[test]
    fn windows_ruby_task() {
        let mut f = file("task.rb");
        f.sha256 = "deadbeef".to_string();
        let descriptor = TaskDescriptor {
            task: "m::task".to_string(),
            files: vec![f],
            input: "{}".to_string(),
            input_method: Some(InputMethod::Environment),
        };
        let plan = plan(
            &descriptor,
            Platform::Windows,
            &roots(r"C:\cache", r"C:\Program Files\Puppet Labs\Puppet\bin"),
        )
        .unwrap();
        assert_eq!(
            plan.argv,
            vec!["ruby".to_string(), r"C:\cache\deadbeef\task.rb".to_string()]
        );
    }

    #[test]
    fn windows_powershell_task_resolves_method_and_prepends_shim() {
        let mut f = file("t.ps1");
        f.sha256 = "f00d".to_string();
        let descriptor = TaskDescriptor {
            task: "m::t".to_string(),
            files: vec![f],
            input: "{\"foo\":\"bar\"}".to_string(),
            input_method: None,
        };
        let plan = plan(
            &descriptor,
            Platform::Windows,
            &roots(r"C:\cache", r"C:\Program Files\Puppet Labs\Puppet\bin"),
        )
        .unwrap();
        assert_eq!(
            plan.argv,
            vec![
                r"C:\Program Files\Puppet Labs\Puppet\bin\PowershellShim.ps1".to_string(),
                "powershell".to_string(),
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-NoLogo".to_string(),
                "-ExecutionPolicy".to_string(),
                "Bypass".to_string(),
                "-File".to_string(),
                r"C:\cache\f00d\t.ps1".to_string(),
            ]
        );
        assert_eq!(plan.environment.get("PT_foo"), Some(&"bar".to_string()));
        assert_eq!(plan.stdin.as_deref(), Some("{\"foo\":\"bar\"}"));
    }

    #[test]
    fn unix_argv_ignores_extension() {
        let f = file("task.pp");
        let descriptor = TaskDescriptor {
            task: "m::t".to_string(),
            files: vec![f],
            input: "{}".to_string(),
            input_method: Some(InputMethod::Stdin),
        };
        let plan = plan(&descriptor, Platform::Unix, &roots("/cache", "/opt/bin")).unwrap();
        assert_eq!(plan.argv.len(), 1);
    }

    #[test]
    fn both_method_maps_input_keys_to_pt_prefixed_env_and_sets_stdin() {
        let descriptor = TaskDescriptor {
            task: "m::t".to_string(),
            files: vec![file("x.sh")],
            input: "{\"foo\":\"bar\"}".to_string(),
            input_method: Some(InputMethod::Both),
        };
        let plan = plan(&descriptor, Platform::Unix, &roots("/cache", "/opt/bin")).unwrap();
        assert_eq!(plan.environment.get("PT_foo"), Some(&"bar".to_string()));
        assert_eq!(plan.stdin.as_deref(), Some("{\"foo\":\"bar\"}"));
    }

    #[test]
    fn stdin_method_produces_empty_environment() {
        let descriptor = TaskDescriptor {
            task: "m::t".to_string(),
            files: vec![file("x.sh")],
            input: "{\"foo\":\"bar\"}".to_string(),
            input_method: Some(InputMethod::Stdin),
        };
        let plan = plan(&descriptor, Platform::Unix, &roots("/cache", "/opt/bin")).unwrap();
        assert!(plan.environment.is_empty());
    }
}
