//! Linked smart object content
//!
//! A linked smart object takes its content from an image file instead of an
//! embedded composition. The file's modification time is remembered so that
//! outside edits can be picked up later.
//!
//! When the file is missing at load time the load does not fail: a
//! transparent placeholder of the last known size stands in, the link is
//! recorded as pending and a [`CompositionEvent::LinkedContentMissing`] is
//! published. The pending link is resolved later, either by relinking to a
//! new path (possibly found with [`search_linked_file`] on a background
//! thread) or by accepting the placeholder.

use crate::composition::Composition;
use crate::config::EngineConfig;
use crate::document::LoadOptions;
use crate::events::CompositionEvent;
use crate::layer::{BaseSource, HolderRef, Layer, LayerId, LayerKind};
use crate::pixel::PixelBuffer;
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Reference from a smart object to an external image file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedContent {
    /// Path of the linked file
    pub path: PathBuf,
    /// Modification time when the file was last read
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl LinkedContent {
    /// Link to `path` with no known modification time
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
        }
    }

    /// The path, resolved against `base_dir` if relative
    pub fn resolve(&self, base_dir: Option<&Path>) -> PathBuf {
        match base_dir {
            Some(dir) if self.path.is_relative() => dir.join(&self.path),
            _ => self.path.clone(),
        }
    }

    /// Whether the file changed on disk since it was last read
    pub fn is_outdated(&self) -> bool {
        match (file_modified(&self.path), self.last_modified) {
            (Some(current), Some(known)) => current > known,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// A linked smart object whose file could not be found
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    /// The smart object
    pub layer: LayerId,
    /// Path that failed to load
    pub path: PathBuf,
}

/// How to settle a pending link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkResolution {
    /// Load the content from another file
    Relink(PathBuf),
    /// Keep the transparent placeholder and forget the link
    KeepPlaceholder,
}

/// Modification time of a file, if it can be read
pub fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Decode a linked image file
pub fn load_linked_image(path: &Path) -> Result<(PixelBuffer, Option<DateTime<Utc>>)> {
    if !path.is_file() {
        return Err(CoreError::MissingLinkedContent(path.to_path_buf()));
    }
    let image = image::open(path)?.to_rgba8();
    Ok((PixelBuffer::from_image(image), file_modified(path)))
}

/// Single-layer composition holding an image
pub fn content_from_image(name: &str, pixels: PixelBuffer, config: EngineConfig) -> Result<Composition> {
    let (width, height) = pixels.dimensions();
    let mut content = Composition::with_config(name, width, height, config);
    content.add_layer(HolderRef::Root, Layer::image(name, pixels))?;
    Ok(content)
}

/// Result of opening a linked file during a document load
#[derive(Debug)]
pub(crate) struct OpenedLink {
    pub composition: Composition,
    pub link: LinkedContent,
    /// Set when a placeholder stands in for a missing file
    pub missing: Option<PathBuf>,
}

pub(crate) fn open_linked_content(
    name: &str,
    link: &LinkedContent,
    size: (u32, u32),
    options: &LoadOptions,
) -> Result<OpenedLink> {
    let path = link.resolve(options.base_dir.as_deref());
    match load_linked_image(&path) {
        Ok((pixels, modified)) => Ok(OpenedLink {
            composition: content_from_image(name, pixels, options.config.clone())?,
            link: LinkedContent {
                path,
                last_modified: modified,
            },
            missing: None,
        }),
        Err(CoreError::MissingLinkedContent(path)) => {
            warn!("Linked file {} not found, using a placeholder", path.display());
            Ok(OpenedLink {
                composition: Composition::with_config(name, size.0, size.1, options.config.clone()),
                link: LinkedContent {
                    path: path.clone(),
                    last_modified: link.last_modified,
                },
                missing: Some(path),
            })
        }
        Err(err) => Err(err),
    }
}

/// Look for a file called `file_name` below `dirs` on a background thread.
///
/// The receiver yields exactly one message: the first match, or `None`.
pub fn search_linked_file(
    file_name: OsString,
    dirs: Vec<PathBuf>,
    max_depth: usize,
) -> Receiver<Option<PathBuf>> {
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name("strata-link-search".to_string())
        .spawn(move || {
            let found = dirs.iter().find_map(|dir| {
                WalkDir::new(dir)
                    .max_depth(max_depth)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .find(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
                    .map(|entry| entry.into_path())
            });
            let _ = tx.send(found);
        });
    if let Err(err) = spawned {
        warn!("Failed to spawn link search thread: {}", err);
    }
    rx
}

impl Composition {
    /// Insert a smart object whose content comes from an image file
    pub fn add_linked_smart_object(
        &mut self,
        holder: HolderRef,
        name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<LayerId> {
        let name = name.into();
        let path = path.as_ref();
        let (pixels, modified) = load_linked_image(path)?;
        let content = content_from_image(&name, pixels, self.config.clone())?;
        let mut layer = Layer::smart_object(name, content);
        if let LayerKind::SmartObject(so) = &mut layer.kind {
            so.link = Some(LinkedContent {
                path: path.to_path_buf(),
                last_modified: modified,
            });
        }
        self.add_layer(holder, layer)
    }

    pub(crate) fn link_missing(&mut self, layer: LayerId, path: PathBuf) {
        self.pending_links.push(PendingLink {
            layer,
            path: path.clone(),
        });
        self.publish(CompositionEvent::LinkedContentMissing { layer, path });
    }

    /// Search for the file of a pending link by its file name
    pub fn search_pending_link(
        &self,
        layer: LayerId,
        dirs: Vec<PathBuf>,
    ) -> Result<Receiver<Option<PathBuf>>> {
        let pending = self
            .pending_links
            .iter()
            .find(|p| p.layer == layer)
            .ok_or(CoreError::NoPendingLink(layer))?;
        let file_name = pending
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| CoreError::MissingLinkedContent(pending.path.clone()))?;
        Ok(search_linked_file(file_name, dirs, self.config.link_search_depth))
    }

    /// Settle a pending link
    pub fn resolve_link(&mut self, layer: LayerId, resolution: LinkResolution) -> Result<()> {
        let index = self
            .pending_links
            .iter()
            .position(|p| p.layer == layer)
            .ok_or(CoreError::NoPendingLink(layer))?;
        match resolution {
            LinkResolution::Relink(path) => {
                // Load before touching anything so a bad path leaves the link pending
                let (pixels, modified) = load_linked_image(&path)?;
                let name = self.layer(layer)?.name().to_string();
                let content = content_from_image(&name, pixels, self.config.clone())?;
                self.replace_linked_content(layer, content)?;
                if let Some(link) = self.smart_object_mut(layer)?.link.as_mut() {
                    link.path = path.clone();
                    link.last_modified = modified;
                }
                self.pending_links.remove(index);
                info!("Relinked '{}' to {}", name, path.display());
                self.publish(CompositionEvent::LinkedContentResolved {
                    layer,
                    path: Some(path),
                });
            }
            LinkResolution::KeepPlaceholder => {
                self.smart_object_mut(layer)?.link = None;
                self.pending_links.remove(index);
                self.publish(CompositionEvent::LinkedContentResolved { layer, path: None });
            }
        }
        Ok(())
    }

    /// Reload every linked file that changed on disk. Returns the reloaded smart objects.
    pub fn check_linked_content(&mut self) -> Result<Vec<LayerId>> {
        let outdated: Vec<(LayerId, PathBuf)> = self
            .store
            .iter()
            .filter(|(id, _)| !self.pending_links.iter().any(|p| p.layer == *id))
            .filter_map(|(id, layer)| match &layer.kind {
                LayerKind::SmartObject(so) => so
                    .link
                    .as_ref()
                    .filter(|link| link.is_outdated())
                    .map(|link| (id, link.path.clone())),
                _ => None,
            })
            .collect();

        let mut reloaded = Vec::with_capacity(outdated.len());
        for (id, path) in outdated {
            let (pixels, modified) = match load_linked_image(&path) {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!("Could not reload {}: {}", path.display(), err);
                    continue;
                }
            };
            let name = self.layer(id)?.name().to_string();
            let content = content_from_image(&name, pixels, self.config.clone())?;
            self.replace_linked_content(id, content)?;
            if let Some(link) = self.smart_object_mut(id)?.link.as_mut() {
                link.last_modified = modified;
            }
            info!("Reloaded linked file {}", path.display());
            self.publish(CompositionEvent::LinkedContentReloaded(id));
            reloaded.push(id);
        }
        Ok(reloaded)
    }

    fn replace_linked_content(&mut self, so: LayerId, content: Composition) -> Result<()> {
        let object = self.smart_object_mut(so)?;
        object.content_revision = content.revision();
        object.content = Box::new(content);
        if let BaseSource::Transformed(transformer) = &mut object.base {
            transformer.invalidate();
        }
        self.smart_object_rebased(so)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, LayerDoc, LayerKindDoc};
    use crate::blend::BlendMode;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn linked_doc(path: &Path) -> Document {
        let mut doc = Document::empty("doc", 4, 4);
        doc.layers.push(LayerDoc {
            name: "linked".to_string(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            mask: None,
            kind: LayerKindDoc::SmartObject {
                content: None,
                content_size: (3, 2),
                link: Some(LinkedContent::new(path)),
                transform: None,
                filters: Vec::new(),
            },
        });
        doc
    }

    #[test]
    fn test_missing_file_gives_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let doc = linked_doc(&dir.path().join("gone.png"));

        let mut comp = Composition::from_document(&doc, &LoadOptions::default()).unwrap();
        assert_eq!(comp.pending_links().len(), 1);
        let so = comp.pending_links()[0].layer;
        let image = comp.layer_image(so).unwrap().unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.pixel(0, 0)[3], 0);

        comp.resolve_link(so, LinkResolution::KeepPlaceholder).unwrap();
        assert!(comp.pending_links().is_empty());
        assert!(comp.smart_object(so).unwrap().link().is_none());
    }

    #[test]
    fn test_relink_loads_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let doc = linked_doc(&dir.path().join("gone.png"));
        let mut comp = Composition::from_document(&doc, &LoadOptions::default()).unwrap();
        let so = comp.pending_links()[0].layer;

        let moved = dir.path().join("sub").join("gone.png");
        fs::create_dir_all(moved.parent().unwrap()).unwrap();
        RgbaImage::from_pixel(3, 2, Rgba([0, 255, 0, 255]))
            .save(&moved)
            .unwrap();

        let found = comp
            .search_pending_link(so, vec![dir.path().to_path_buf()])
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(found.as_deref(), Some(moved.as_path()));

        let (_, rx) = comp.subscribe();
        comp.resolve_link(so, LinkResolution::Relink(moved.clone())).unwrap();
        assert!(comp.pending_links().is_empty());
        assert_eq!(comp.composite_image().unwrap().pixel(0, 0), Rgba([0, 255, 0, 255]));
        assert!(rx.try_iter().any(|e| e
            == CompositionEvent::LinkedContentResolved {
                layer: so,
                path: Some(moved.clone())
            }));
    }

    #[test]
    fn test_resolve_without_pending_link() {
        let mut comp = Composition::new("doc", 2, 2);
        let fill = comp
            .add_layer(HolderRef::Root, Layer::fill("f", Rgba([0, 0, 0, 255])))
            .unwrap();
        let result = comp.resolve_link(fill, LinkResolution::KeepPlaceholder);
        assert!(matches!(result, Err(CoreError::NoPendingLink(_))));
    }

    #[test]
    fn test_add_linked_smart_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255])).save(&path).unwrap();

        let mut comp = Composition::new("doc", 2, 2);
        let so = comp
            .add_linked_smart_object(HolderRef::Root, "photo", &path)
            .unwrap();
        let link = comp.smart_object(so).unwrap().link().unwrap();
        assert_eq!(link.path, path);
        assert!(link.last_modified.is_some());
        assert!(comp.check_linked_content().unwrap().is_empty());
        assert_eq!(comp.composite_image().unwrap().pixel(1, 1), Rgba([9, 8, 7, 255]));
    }
}
