use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: &'static str,
    pub required: bool,
    pub purpose: &'static str,
    pub hint: &'static str,
}

pub const KNOWN_TOOLS: &[ToolInfo] = &[
    ToolInfo {
        name: "docker",
        required: true,
        purpose: "container image build and push",
        hint: "Install Docker Desktop or docker-ce: https://docs.docker.com/get-docker/",
    },
    ToolInfo {
        name: "kubectl",
        required: true,
        purpose: "port-forward to the in-cluster telemetry collector",
        hint: "Install kubectl: https://kubernetes.io/docs/tasks/tools/",
    },
    ToolInfo {
        name: "yarn",
        required: true,
        purpose: "frontend and backend builds",
        hint: "Enable yarn with `corepack enable`",
    },
    ToolInfo {
        name: "lsof",
        required: true,
        purpose: "finding processes that hold declared ports",
        hint: "Install lsof from your system package manager (apt install lsof, brew install lsof)",
    },
    ToolInfo {
        name: "kargo",
        required: false,
        purpose: "warehouse refresh after a push",
        hint: "Install the kargo CLI: https://docs.kargo.io/user-guide/installing-the-cli",
    },
    ToolInfo {
        name: "devspace",
        required: false,
        purpose: "remote development sessions",
        hint: "Install devspace: https://www.devspace.sh/docs/getting-started/installation",
    },
    ToolInfo {
        name: "gh",
        required: false,
        purpose: "registry credentials for ghcr.io",
        hint: "Install the GitHub CLI (https://cli.github.com) and run `gh auth login`",
    },
];

pub fn tool_info(name: &str) -> Option<&'static ToolInfo> {
    KNOWN_TOOLS.iter().find(|tool| tool.name == name)
}

pub fn install_hint(name: &str) -> String {
    tool_info(name)
        .map(|tool| tool.hint.to_string())
        .unwrap_or_else(|| format!("Make sure '{}' is installed and on PATH", name))
}

/// Resolves a program the way the shell would, without spawning it.
pub fn find_tool(name: &str) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return false,
    };

    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
