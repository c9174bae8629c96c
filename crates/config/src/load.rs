use crate::Config;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "WISDOM_";
/// File name (without extension) looked for in every search directory.
pub const FILE_STEM: &str = "wisdom";

/// Directories searched for configuration files, lowest precedence first:
/// the platform configuration directory, then the working directory.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::with_capacity(2);
    if let Some(project) = directories::ProjectDirs::from("", "", "wisdom") {
        dirs.push(project.config_dir().to_path_buf());
    }
    dirs.push(PathBuf::from("."));
    dirs
}

fn merge_files(figment: Figment, dir: &Path) -> Figment {
    figment
        .merge(Yaml::file(dir.join(format!("{FILE_STEM}.yaml"))))
        .merge(Yaml::file(dir.join(format!("{FILE_STEM}.yml"))))
        .merge(Toml::file(dir.join(format!("{FILE_STEM}.toml"))))
        .merge(Json::file(dir.join(format!("{FILE_STEM}.json"))))
}

impl Config {
    /// Load from the default search directories and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(search_dirs())
    }

    /// Load from files in `dirs` (later directories override earlier ones)
    /// and the environment, then validate.
    pub fn load_from<I, P>(dirs: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let config: Self = Self::figment(dirs).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// The layered provider chain, without extracting anything.
    pub fn figment<I, P>(dirs: I) -> Figment
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        dirs.into_iter()
            .fold(figment, |figment, dir| merge_files(figment, dir.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::time::Duration;

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|jail| {
            let config = Config::load_from([jail.directory()]).unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "wisdom.yaml",
                r#"
                    uploader:
                      caption_images_with_text: true
                      interval: 0.5
                    source:
                      endpoint: "https://example.com/generate"
                "#,
            )?;
            let config = Config::load_from([jail.directory()]).unwrap();
            assert!(config.uploader.caption_images_with_text);
            assert_eq!(config.uploader.interval, Duration::from_millis(500));
            assert_eq!(config.source.endpoint.as_deref(), Some("https://example.com/generate"));
            // Untouched sections keep their defaults.
            assert_eq!(config.crawler, Default::default());
            Ok(())
        });
    }

    #[test]
    fn test_later_directories_win() {
        let user = tempfile::tempdir().unwrap();
        std::fs::write(user.path().join("wisdom.toml"), "[analysis]\nbatch_size = 4\n[crawler]\nenabled = false\n").unwrap();
        Jail::expect_with(|jail| {
            jail.create_file("wisdom.toml", "[analysis]\nbatch_size = 8\n")?;
            let config = Config::load_from([user.path(), jail.directory()]).unwrap();
            assert_eq!(config.analysis.batch_size, 8);
            assert!(!config.crawler.enabled);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_files() {
        Jail::expect_with(|jail| {
            jail.create_file("wisdom.yml", "crawler:\n  interval: 10\n")?;
            jail.set_env("WISDOM_CRAWLER__INTERVAL", "2");
            jail.set_env("WISDOM_PERSISTENCE__BLOBS", "/srv/wisdom/images");
            let config = Config::load_from([jail.directory()]).unwrap();
            assert_eq!(config.crawler.interval, Duration::from_secs(2));
            assert_eq!(config.persistence.blobs, PathBuf::from("/srv/wisdom/images"));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("wisdom.yaml", "analysis:\n  interval: -1\n")?;
            let err = Config::load_from([jail.directory()]).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));

            jail.create_file("wisdom.yaml", "analysis:\n  batch_size: 0\n")?;
            let err = Config::load_from([jail.directory()]).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }
}
