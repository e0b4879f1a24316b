use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::map::MapData;
use crate::world::WorldGraph;

/// Failures raised while reading asset definitions.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate {kind} id {id:?} (second definition in {path})")]
    DuplicateId {
        kind: &'static str,
        id: String,
        path: PathBuf,
    },
    #[error("unknown script asset {0:?}")]
    UnknownScript(String),
}

/// A per-file problem recorded during a data-root scan. Offending files are
/// skipped; the rest of the library loads normally.
#[derive(Debug)]
pub struct LoadIssue {
    pub path: PathBuf,
    pub error: FormatError,
}

/// Every definition found under a data root, loaded once and shared.
///
/// Layout: `worlds/*.json`, `maps/*.json`, `scripts/*.lua`.
#[derive(Debug, Default)]
pub struct AssetLibrary {
    worlds: BTreeMap<String, WorldGraph>,
    maps: BTreeMap<String, MapData>,
    scripts: BTreeMap<String, String>,
    issues: Vec<LoadIssue>,
}

impl AssetLibrary {
    /// Scan a data root. Only a missing root is fatal; malformed files are
    /// recorded as issues and skipped.
    pub fn load_from_dir(root: &Path) -> Result<Self, FormatError> {
        if !root.is_dir() {
            return Err(FormatError::Io {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "data root is not a directory"),
            });
        }

        let mut library = AssetLibrary::default();
        library.scan_json(&root.join("worlds"), |library, path, text| {
            let world: WorldGraph = serde_json::from_str(text).map_err(|source| {
                FormatError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            if library.worlds.contains_key(&world.id) {
                return Err(FormatError::DuplicateId {
                    kind: "world",
                    id: world.id,
                    path: path.to_path_buf(),
                });
            }
            library.worlds.insert(world.id.clone(), world);
            Ok(())
        });
        library.scan_json(&root.join("maps"), |library, path, text| {
            let map: MapData = serde_json::from_str(text).map_err(|source| FormatError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            if library.maps.contains_key(&map.id) {
                return Err(FormatError::DuplicateId {
                    kind: "map",
                    id: map.id,
                    path: path.to_path_buf(),
                });
            }
            library.maps.insert(map.id.clone(), map);
            Ok(())
        });
        library.scan_scripts(&root.join("scripts"));
        Ok(library)
    }

    /// Assemble a library directly from parts; used by engine tests that do
    /// not want a directory on disk.
    pub fn from_parts(
        worlds: impl IntoIterator<Item = WorldGraph>,
        maps: impl IntoIterator<Item = MapData>,
    ) -> Self {
        let mut library = AssetLibrary::default();
        for world in worlds {
            library.worlds.insert(world.id.clone(), world);
        }
        for map in maps {
            library.maps.insert(map.id.clone(), map);
        }
        library
    }

    pub fn insert_script(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.scripts.insert(name.into(), source.into());
    }

    pub fn world(&self, id: &str) -> Option<&WorldGraph> {
        self.worlds.get(id)
    }

    pub fn map(&self, id: &str) -> Option<&MapData> {
        self.maps.get(id)
    }

    pub fn script_source(&self, name: &str) -> Result<&str, FormatError> {
        self.scripts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FormatError::UnknownScript(name.to_string()))
    }

    pub fn world_ids(&self) -> impl Iterator<Item = &str> {
        self.worlds.keys().map(String::as_str)
    }

    pub fn issues(&self) -> &[LoadIssue] {
        &self.issues
    }

    fn scan_json<F>(&mut self, dir: &Path, mut ingest: F)
    where
        F: FnMut(&mut Self, &Path, &str) -> Result<(), FormatError>,
    {
        for entry in WalkDir::new(dir).min_depth(1).into_iter().flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(source) => {
                    self.issues.push(LoadIssue {
                        path: path.to_path_buf(),
                        error: FormatError::Io {
                            path: path.to_path_buf(),
                            source,
                        },
                    });
                    continue;
                }
            };
            if let Err(error) = ingest(self, path, &text) {
                self.issues.push(LoadIssue {
                    path: path.to_path_buf(),
                    error,
                });
            }
        }
    }

    fn scan_scripts(&mut self, dir: &Path) {
        for entry in WalkDir::new(dir).min_depth(1).into_iter().flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("lua") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match fs::read_to_string(path) {
                Ok(source) => {
                    self.scripts.insert(stem.to_string(), source);
                }
                Err(source) => self.issues.push(LoadIssue {
                    path: path.to_path_buf(),
                    error: FormatError::Io {
                        path: path.to_path_buf(),
                        source,
                    },
                }),
            }
        }
    }
}
