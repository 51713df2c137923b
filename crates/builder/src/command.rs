//! Build invocation for the builder image

use crate::runtime::{ContainerSpec, VolumeMount};
use k6x_config::constants::{BUILDER_IMAGE, BUILD_COMMAND, CACHE_PATH, CACHE_VOLUME};
use k6x_types::{Modules, Platform};

/// Argument and environment lists passed to the build entrypoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub args: Vec<String>,
    pub env: Vec<String>,
}

impl BuildCommand {
    /// Build the command line: the `build` subcommand followed by one
    /// `--with "<name> <tag>"` pair per module, in module order.
    #[must_use]
    pub fn new(platform: &Platform, modules: &Modules) -> Self {
        let mut args = Vec::with_capacity(1 + 2 * modules.len());
        args.push(BUILD_COMMAND.to_string());

        for module in modules {
            args.push("--with".to_string());
            args.push(module.with_arg());
        }

        Self {
            args,
            env: platform.env(),
        }
    }

    /// `--with` values in order
    pub fn with_values(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .skip(1)
            .step_by(2)
            .zip(self.args.iter().skip(2).step_by(2))
            .filter(|(flag, _)| flag.as_str() == "--with")
            .map(|(_, value)| value.as_str())
    }
}

/// Container definition for one build: no tty, only the cache volume mounted
#[must_use]
pub fn container_spec(platform: &Platform, modules: &Modules) -> ContainerSpec {
    let BuildCommand { args, env } = BuildCommand::new(platform, modules);

    ContainerSpec {
        image: BUILDER_IMAGE.to_string(),
        cmd: args,
        env,
        tty: false,
        mounts: vec![VolumeMount {
            source: CACHE_VOLUME.to_string(),
            target: CACHE_PATH.to_string(),
        }],
    }
}
