//! Local whiteboard state and reconciliation of remote updates
//!
//! Page scenes are opaque blobs owned by the render engine. Remote
//! snapshots replace a page unconditionally (last write wins), remote page
//! structure only ever grows the local page list, and remote strokes are
//! reassembled before reaching the renderer.

pub mod scene;
pub mod strokes;

use crate::channels::{PageStructure, Point, SceneBlob, StrokeEvent};
use crate::peer::PeerId;
use crate::{Error, Result};
use tracing::{debug, info, warn};

pub use scene::SceneStore;
pub use strokes::{RemotePath, StrokeAssembler, StrokeOutcome};

/// Upper bound on pages a remote peer can make us allocate
pub const MAX_PAGES: usize = 500;

/// Vector drawing engine collaborator
///
/// Owns the displayed page. Everything else about rendering is out of scope
/// for the session.
pub trait RenderEngine: Send + Sync {
    /// Serialize the displayed page
    fn serialize_scene(&self) -> SceneBlob;

    /// Replace the displayed page with `scene` and re-render
    fn load_scene(&mut self, scene: &SceneBlob) -> Result<()>;

    /// Empty the displayed page
    fn clear_scene(&mut self);

    /// A remote path started on the displayed page
    fn apply_stroke_start(&mut self, path: &RemotePath);

    /// Points were appended to a remote path on the displayed page
    fn apply_stroke_move(&mut self, path_id: &str, points: &[Point]);

    /// A remote path on the displayed page was finished
    fn apply_stroke_end(&mut self, path: &RemotePath);
}

/// How an inbound snapshot was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The page is displayed and was re-rendered
    Rendered,
    /// The page is not displayed; only its cache was replaced
    Cached,
}

/// Pages of the local whiteboard
pub struct Whiteboard {
    /// Cached scene per page; the displayed page's entry may be stale
    pages: Vec<Option<SceneBlob>>,
    current: usize,
    renderer: Box<dyn RenderEngine>,
    strokes: StrokeAssembler,
}

impl Whiteboard {
    /// Create a board with one empty page
    pub fn new(renderer: Box<dyn RenderEngine>) -> Self {
        Self {
            pages: vec![None],
            current: 0,
            renderer,
            strokes: StrokeAssembler::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_page(&self) -> usize {
        self.current
    }

    pub fn renderer(&self) -> &dyn RenderEngine {
        self.renderer.as_ref()
    }

    /// Remote paths still being drawn
    pub fn open_strokes(&self) -> usize {
        self.strokes.open_paths()
    }

    /// Current scene of `page`
    ///
    /// The displayed page is read from the renderer; other pages come from
    /// the cache and are `None` if never rendered.
    pub fn snapshot(&self, page: usize) -> Option<SceneBlob> {
        if page == self.current {
            Some(self.renderer.serialize_scene())
        } else {
            self.pages.get(page).cloned().flatten()
        }
    }

    /// Page list with the displayed page refreshed from the renderer
    pub fn structure(&self) -> PageStructure {
        let mut pages = self.pages.clone();
        pages[self.current] = Some(self.renderer.serialize_scene());
        PageStructure {
            pages,
            current_page_index: self.current,
            total_pages: self.pages.len(),
        }
    }

    /// Cache a scene the application serialized for one of its pages
    pub fn store_local_snapshot(&mut self, page: usize, scene: SceneBlob) -> Result<()> {
        self.check_index(page)?;
        self.pages[page] = Some(scene);
        Ok(())
    }

    /// Apply a remote snapshot for `page`
    ///
    /// A page beyond the local count grows the page list first.
    pub fn apply_snapshot(&mut self, page: usize, scene: SceneBlob) -> Result<SnapshotOutcome> {
        self.grow_to(page.saturating_add(1))?;

        if page == self.current {
            self.renderer.load_scene(&scene)?;
            self.pages[page] = Some(scene);
            debug!(page, "Applied snapshot to displayed page");
            Ok(SnapshotOutcome::Rendered)
        } else {
            self.pages[page] = Some(scene);
            debug!(page, current = self.current, "Cached snapshot for hidden page");
            Ok(SnapshotOutcome::Cached)
        }
    }

    /// Grow the page list to the remote count; returns how many pages were added
    ///
    /// A smaller remote count leaves the local pages untouched.
    pub fn apply_structure(&mut self, structure: &PageStructure) -> usize {
        let before = self.pages.len();
        let target = structure.total_pages.min(MAX_PAGES);
        if target < structure.total_pages {
            warn!(remote = structure.total_pages, "Remote page count capped at {}", MAX_PAGES);
        }
        while self.pages.len() < target {
            let index = self.pages.len();
            self.pages
                .push(structure.pages.get(index).cloned().flatten());
        }

        let added = self.pages.len() - before;
        if added > 0 {
            info!(added, total = self.pages.len(), "Adopted remote pages");
        } else if structure.total_pages < before {
            debug!(
                remote = structure.total_pages,
                local = before,
                "Ignoring smaller remote page count"
            );
        }
        added
    }

    /// Navigate to a page a remote peer switched to
    pub fn apply_page_change(&mut self, page: usize) -> Result<()> {
        self.grow_to(page.saturating_add(1))?;
        self.switch_to(page)
    }

    /// Apply a remote stroke event, rendering it if its page is displayed
    pub fn apply_stroke(&mut self, sender: &PeerId, event: StrokeEvent) -> StrokeOutcome {
        let outcome = self.strokes.apply(sender, event);
        match &outcome {
            StrokeOutcome::Started(path) if path.page_index == self.current => {
                self.renderer.apply_stroke_start(path);
            }
            StrokeOutcome::Extended {
                path_id,
                page_index,
                points,
            } if *page_index == self.current => {
                self.renderer.apply_stroke_move(path_id, points);
            }
            StrokeOutcome::Finished(path) if path.page_index == self.current => {
                self.renderer.apply_stroke_end(path);
            }
            _ => {}
        }
        outcome
    }

    /// Drop open strokes of a peer that left
    pub fn abandon_strokes(&mut self, peer_id: &PeerId) -> usize {
        self.strokes.abandon_peer(peer_id)
    }

    /// Navigate locally
    pub fn go_to_page(&mut self, page: usize) -> Result<()> {
        self.check_index(page)?;
        self.switch_to(page)
    }

    /// Append an empty page and navigate to it; returns its index
    pub fn add_page(&mut self) -> Result<usize> {
        self.grow_to(self.pages.len() + 1)?;
        let index = self.pages.len() - 1;
        self.switch_to(index)?;
        Ok(index)
    }

    /// Delete a page locally
    ///
    /// The last remaining page cannot be deleted. Deleting the displayed
    /// page shows the page that took its place (or the new last page).
    pub fn delete_page(&mut self, page: usize) -> Result<()> {
        self.check_index(page)?;
        if self.pages.len() == 1 {
            return Err(Error::InvalidPage(
                "cannot delete the last page".to_string(),
            ));
        }

        self.pages.remove(page);
        if page == self.current {
            self.current = page.min(self.pages.len() - 1);
            self.load_current()?;
        } else if page < self.current {
            self.current -= 1;
        }

        info!(deleted = page, current = self.current, "Deleted page");
        Ok(())
    }

    /// Empty the displayed page; returns its now-empty scene
    pub fn clear_current_page(&mut self) -> SceneBlob {
        self.renderer.clear_scene();
        let scene = self.renderer.serialize_scene();
        self.pages[self.current] = Some(scene.clone());
        scene
    }

    fn check_index(&self, page: usize) -> Result<()> {
        if page >= self.pages.len() {
            return Err(Error::InvalidPage(format!(
                "index {} out of range ({} pages)",
                page,
                self.pages.len()
            )));
        }
        Ok(())
    }

    fn grow_to(&mut self, count: usize) -> Result<()> {
        if count > MAX_PAGES {
            return Err(Error::InvalidPage(format!(
                "{} pages requested, limit is {}",
                count, MAX_PAGES
            )));
        }
        if self.pages.len() < count {
            debug!(from = self.pages.len(), to = count, "Growing page list");
            self.pages.resize(count, None);
        }
        Ok(())
    }

    /// Save the displayed page, then display `page`
    fn switch_to(&mut self, page: usize) -> Result<()> {
        if page == self.current {
            return Ok(());
        }
        self.pages[self.current] = Some(self.renderer.serialize_scene());
        self.current = page;
        self.load_current()
    }

    fn load_current(&mut self) -> Result<()> {
        match self.pages[self.current].clone() {
            Some(scene) => {
                if let Err(e) = self.renderer.load_scene(&scene) {
                    warn!(page = self.current, "Failed to load cached scene: {}", e);
                    self.renderer.clear_scene();
                    return Err(e);
                }
            }
            None => self.renderer.clear_scene(),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Whiteboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Whiteboard")
            .field("pages", &self.pages.len())
            .field("current", &self.current)
            .field("open_strokes", &self.strokes.open_paths())
            .finish()
    }
}
