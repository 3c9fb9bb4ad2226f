//! Candidate plugin binary resolution.
//!
//! A user-supplied reference is resolved in order: an existing local
//! file, an absolute http(s) URL, and finally a plugin name looked up in
//! one or all registered repositories. Downloads land in temp files whose
//! lifetime is tied to the returned [`LocatedBinary`] — dropping it on
//! any failure path removes the file.

use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

use crate::checksum::sha1_hex_file;
use crate::config::PluginRepository;
use crate::error::{PluginError, PluginResult};
use crate::repository::RepositoryClient;

/// Where a candidate binary came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    /// A file that already existed on disk; never deleted by us.
    LocalFile,
    /// Downloaded from an explicit URL; no checksum available.
    Url { url: String },
    /// Downloaded from a registered repository listing.
    Repository { repository: String, version: String },
}

/// A located, not-yet-installed candidate binary.
#[derive(Debug)]
pub struct LocatedBinary {
    path: PathBuf,
    /// Owns the temp file for downloaded sources; dropping it deletes
    /// the download.
    temp: Option<tempfile::TempPath>,
    pub source: PluginSource,
    /// Bytes downloaded, when the source was remote.
    pub size: Option<u64>,
}

impl LocatedBinary {
    /// Current on-disk location of the candidate.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves user references to candidate binaries.
pub struct PluginLocator<'a> {
    client: &'a dyn RepositoryClient,
    repositories: &'a [PluginRepository],
    platform: String,
    download_dir: PathBuf,
}

impl<'a> PluginLocator<'a> {
    pub fn new(
        client: &'a dyn RepositoryClient,
        repositories: &'a [PluginRepository],
        platform: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            repositories,
            platform: platform.into(),
            download_dir: download_dir.into(),
        }
    }

    /// Resolve `reference`, optionally restricted to one repository.
    pub async fn locate(
        &self,
        reference: &str,
        repository_filter: Option<&str>,
    ) -> PluginResult<LocatedBinary> {
        if Path::new(reference).is_file() {
            debug!(path = reference, "plugin reference is a local file");
            return Ok(LocatedBinary {
                path: PathBuf::from(reference),
                temp: None,
                source: PluginSource::LocalFile,
                size: None,
            });
        }

        if let Ok(url) = Url::parse(reference) {
            if matches!(url.scheme(), "http" | "https") {
                debug!(%url, "plugin reference is a URL");
                let (temp, size) = self.download_to_temp(reference).await?;
                return Ok(LocatedBinary {
                    path: temp.to_path_buf(),
                    temp: Some(temp),
                    source: PluginSource::Url { url: reference.to_string() },
                    size: Some(size),
                });
            }
        }

        self.locate_in_repositories(reference, repository_filter).await
    }

    async fn locate_in_repositories(
        &self,
        name: &str,
        repository_filter: Option<&str>,
    ) -> PluginResult<LocatedBinary> {
        let selected: Vec<&PluginRepository> = match repository_filter {
            Some(filter) => {
                let repository = self
                    .repositories
                    .iter()
                    .find(|r| r.name.eq_ignore_ascii_case(filter))
                    .ok_or_else(|| PluginError::RepositoryNotFound { name: filter.to_string() })?;
                vec![repository]
            }
            None => self.repositories.iter().collect(),
        };

        let mut found_by_name = false;
        for repository in selected {
            let plugins = self.client.list(repository).await?;
            // Plugin names are matched case-sensitively; `-r`
            // disambiguates when several repositories list the plugin.
            let Some(entry) = plugins.iter().find(|p| p.name == name) else {
                continue;
            };
            found_by_name = true;

            if self.platform.is_empty() {
                continue;
            }
            let Some(release) = entry.binary_for_platform(&self.platform) else {
                continue;
            };

            debug!(
                plugin = name,
                repository = %repository.name,
                platform = %self.platform,
                "downloading plugin from repository"
            );
            let (temp, size) = self.download_to_temp(&release.url).await?;

            if !release.checksum.is_empty() {
                let actual = sha1_hex_file(&temp).await?;
                if !actual.eq_ignore_ascii_case(&release.checksum) {
                    // `temp` drops here, removing the download.
                    return Err(PluginError::ChecksumMismatch {
                        name: name.to_string(),
                        expected: release.checksum.clone(),
                        actual,
                    });
                }
            }

            return Ok(LocatedBinary {
                path: temp.to_path_buf(),
                temp: Some(temp),
                source: PluginSource::Repository {
                    repository: repository.name.clone(),
                    version: entry.version.clone(),
                },
                size: Some(size),
            });
        }

        if found_by_name {
            Err(PluginError::PluginNotFoundForPlatform {
                name: name.to_string(),
                platform: self.platform.clone(),
            })
        } else {
            Err(PluginError::PluginNotFound { name: name.to_string() })
        }
    }

    async fn download_to_temp(&self, url: &str) -> PluginResult<(tempfile::TempPath, u64)> {
        std::fs::create_dir_all(&self.download_dir)?;
        let temp = tempfile::Builder::new()
            .prefix("strato-plugin-")
            .tempfile_in(&self.download_dir)?
            .into_temp_path();
        let size = self.client.download(url, &temp).await?;
        Ok((temp, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strato_types::{BinaryRelease, RepositoryPlugin};

    use crate::checksum::sha1_hex;

    /// Canned repository client: one listing per repository name, one
    /// byte payload served for every download URL.
    struct FakeClient {
        listings: Vec<(String, Vec<RepositoryPlugin>)>,
        payload: Vec<u8>,
    }

    #[async_trait]
    impl RepositoryClient for FakeClient {
        async fn list(&self, repository: &PluginRepository) -> PluginResult<Vec<RepositoryPlugin>> {
            self.listings
                .iter()
                .find(|(name, _)| *name == repository.name)
                .map(|(_, plugins)| plugins.clone())
                .ok_or_else(|| PluginError::RepositoryUnreachable {
                    name: repository.name.clone(),
                    detail: "no listing".into(),
                })
        }

        async fn download(&self, _url: &str, destination: &Path) -> PluginResult<u64> {
            std::fs::write(destination, &self.payload)?;
            Ok(self.payload.len() as u64)
        }
    }

    fn repo(name: &str) -> PluginRepository {
        PluginRepository { name: name.into(), url: format!("https://{name}.example.com") }
    }

    fn listing_entry(name: &str, platform: &str, checksum: &str) -> RepositoryPlugin {
        RepositoryPlugin {
            name: name.into(),
            description: String::new(),
            version: "1.1.1".into(),
            binaries: vec![BinaryRelease {
                platform: platform.into(),
                url: format!("https://dl.example.com/{name}"),
                checksum: checksum.into(),
            }],
        }
    }

    #[tokio::test]
    async fn local_file_wins_over_everything() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("my-plugin");
        std::fs::write(&file, b"bin").unwrap();

        let client = FakeClient { listings: vec![], payload: vec![] };
        let locator = PluginLocator::new(&client, &[], "linux64", dir.path().join("tmp"));
        let located = locator.locate(file.to_str().unwrap(), None).await.unwrap();
        assert_eq!(located.source, PluginSource::LocalFile);
        assert_eq!(located.path(), file.as_path());
    }

    #[tokio::test]
    async fn url_reference_downloads_to_temp() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient { listings: vec![], payload: b"from-url".to_vec() };
        let locator = PluginLocator::new(&client, &[], "linux64", dir.path());

        let located = locator.locate("https://example.com/plugin.bin", None).await.unwrap();
        assert!(matches!(located.source, PluginSource::Url { .. }));
        assert_eq!(located.size, Some(8));
        assert_eq!(std::fs::read(located.path()).unwrap(), b"from-url");

        let path = located.path().to_path_buf();
        drop(located);
        assert!(!path.exists(), "temp download must vanish when the candidate drops");
    }

    #[tokio::test]
    async fn unknown_repository_filter_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient { listings: vec![], payload: vec![] };
        let repos = [repo("community")];
        let locator = PluginLocator::new(&client, &repos, "linux64", dir.path());

        let err = locator.locate("echo", Some("unknown")).await.unwrap_err();
        assert!(matches!(err, PluginError::RepositoryNotFound { .. }));
    }

    #[tokio::test]
    async fn unlisted_name_is_plugin_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient {
            listings: vec![("community".into(), vec![listing_entry("other", "linux64", "")])],
            payload: vec![],
        };
        let repos = [repo("community")];
        let locator = PluginLocator::new(&client, &repos, "linux64", dir.path());

        let err = locator.locate("echo", None).await.unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound { .. }));
    }

    #[tokio::test]
    async fn name_match_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient {
            listings: vec![("community".into(), vec![listing_entry("Echo", "linux64", "")])],
            payload: vec![],
        };
        let repos = [repo("community")];
        let locator = PluginLocator::new(&client, &repos, "linux64", dir.path());

        let err = locator.locate("echo", None).await.unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound { .. }));
    }

    #[tokio::test]
    async fn listed_name_without_platform_binary_fails_for_platform() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient {
            listings: vec![("community".into(), vec![listing_entry("echo", "win64", "")])],
            payload: vec![],
        };
        let repos = [repo("community")];
        let locator = PluginLocator::new(&client, &repos, "linux64", dir.path());

        let err = locator.locate("echo", None).await.unwrap_err();
        match err {
            PluginError::PluginNotFoundForPlatform { name, platform } => {
                assert_eq!(name, "echo");
                assert_eq!(platform, "linux64");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_platform_tag_means_no_compatible_binary() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient {
            listings: vec![("community".into(), vec![listing_entry("echo", "linux64", "")])],
            payload: vec![],
        };
        let repos = [repo("community")];
        let locator = PluginLocator::new(&client, &repos, "", dir.path());

        let err = locator.locate("echo", None).await.unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFoundForPlatform { .. }));
    }

    #[tokio::test]
    async fn matching_checksum_accepts_download() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"verified-bytes".to_vec();
        let checksum = sha1_hex(&payload);
        let client = FakeClient {
            listings: vec![("community".into(), vec![listing_entry("echo", "linux64", &checksum)])],
            payload,
        };
        let repos = [repo("community")];
        let locator = PluginLocator::new(&client, &repos, "linux64", dir.path());

        let located = locator.locate("echo", None).await.unwrap();
        assert!(matches!(located.source, PluginSource::Repository { .. }));
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_and_removes_download() {
        let dir = tempfile::tempdir().unwrap();
        let download_dir = dir.path().join("downloads");
        let client = FakeClient {
            listings: vec![(
                "community".into(),
                vec![listing_entry("echo", "linux64", "0000000000000000000000000000000000000000")],
            )],
            payload: b"tampered".to_vec(),
        };
        let repos = [repo("community")];
        let locator = PluginLocator::new(&client, &repos, "linux64", download_dir.clone());

        let err = locator.locate("echo", None).await.unwrap_err();
        assert!(matches!(err, PluginError::ChecksumMismatch { .. }));

        let leftovers: Vec<_> = std::fs::read_dir(&download_dir).unwrap().collect();
        assert!(leftovers.is_empty(), "checksum failure must not orphan the download");
    }
}
