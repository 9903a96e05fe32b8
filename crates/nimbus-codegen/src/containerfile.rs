//! Containerfile generation for function images.
//!
//! Both variants are pure functions of their parameters and perform no
//! I/O. The release recipe is the one deployments build; the dev recipe
//! runs under the interpreter and exists for integration tests and local
//! iteration.

/// Parameters for recipe generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerfileParams {
    /// Image used for dependency resolution and compilation.
    pub build_image: String,
    /// Image the compiled executable ships in.
    pub runtime_image: String,
    /// Alias for the build stage, referenced by `COPY --from`.
    pub build_stage_tag: String,
}

impl Default for ContainerfileParams {
    fn default() -> Self {
        Self {
            build_image: "dart:stable".to_string(),
            runtime_image: "debian:bookworm-slim".to_string(),
            build_stage_tag: "build".to_string(),
        }
    }
}

impl ContainerfileParams {
    pub fn with_base_image(base_image: &str) -> Self {
        Self {
            build_image: base_image.to_string(),
            ..Default::default()
        }
    }
}

/// Two-stage release recipe: compile a self-contained executable, then
/// ship it on a slim runtime with the shared-volume mount point as the
/// working directory.
pub fn release_containerfile(params: &ContainerfileParams) -> String {
    format!(
        r#"FROM {build_image} AS {stage}
WORKDIR /app
COPY pubspec.* ./
RUN dart pub get
COPY . .
RUN dart pub get --offline
RUN dart compile exe main.dart -o /app/bootstrap

FROM {runtime_image}
COPY --from={stage} /runtime/ /
COPY --from={stage} /app/bootstrap /app/bootstrap
WORKDIR /functions
ENTRYPOINT ["/app/bootstrap"]
"#,
        build_image = params.build_image,
        runtime_image = params.runtime_image,
        stage = params.build_stage_tag,
    )
}

/// Single-stage development recipe running under the interpreter.
pub fn dev_containerfile(params: &ContainerfileParams) -> String {
    format!(
        r#"FROM {build_image}
WORKDIR /app
COPY pubspec.* ./
RUN dart pub get
COPY . .
WORKDIR /functions
ENTRYPOINT ["dart", "run", "/app/main.dart"]
"#,
        build_image = params.build_image,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_recipe_is_two_stage() {
        let recipe = release_containerfile(&ContainerfileParams::default());

        assert!(recipe.starts_with("FROM dart:stable AS build\n"));
        assert!(recipe.contains("FROM debian:bookworm-slim\n"));
        assert!(recipe.contains("dart compile exe main.dart -o /app/bootstrap"));
        assert!(recipe.contains("COPY --from=build /app/bootstrap /app/bootstrap"));
        assert!(recipe.contains("WORKDIR /functions"));
        assert!(recipe.contains("ENTRYPOINT [\"/app/bootstrap\"]"));
    }

    #[test]
    fn custom_parameters_flow_through() {
        let params = ContainerfileParams {
            build_image: "registry.local/dart:3.6".to_string(),
            runtime_image: "registry.local/slim:1".to_string(),
            build_stage_tag: "compile".to_string(),
        };
        let recipe = release_containerfile(&params);

        assert!(recipe.contains("FROM registry.local/dart:3.6 AS compile"));
        assert!(recipe.contains("FROM registry.local/slim:1"));
        assert!(recipe.contains("COPY --from=compile"));
    }

    #[test]
    fn dev_recipe_runs_under_interpreter() {
        let recipe = dev_containerfile(&ContainerfileParams::default());

        assert!(recipe.starts_with("FROM dart:stable\n"));
        assert!(!recipe.contains("compile exe"));
        assert!(recipe.contains("ENTRYPOINT [\"dart\", \"run\", \"/app/main.dart\"]"));
    }

    #[test]
    fn generation_is_pure() {
        let params = ContainerfileParams::default();
        assert_eq!(
            release_containerfile(&params),
            release_containerfile(&params)
        );
        assert_eq!(dev_containerfile(&params), dev_containerfile(&params));
    }
}
