//! Navigation targets and breadcrumbs
//!
//! Locations have three shapes:
//! - `/w/{workspace}` for the workspace overview
//! - `/w/{workspace}/doc/{id}` for a document
//! - `/w/{workspace}/folder/{id}` for a folder
//!
//! Query strings and fragments are ignored. Breadcrumbs walk the folder
//! parent chain in the cache; a revisited folder or a chain deeper than the
//! configured limit is reported as an error instead of looping. A route on
//! a temporary id follows the entity when the server assigns its real id.

use crate::error::NavigationError;
use crate::prefetch::PrefetchScheduler;
use folio_cache::{CacheEvent, CacheStore, Change, Subscription, Topic};
use folio_model::{EntityId, EntityKind, WorkspaceId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

/// Where the UI is pointed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// Workspace overview
    Workspace(WorkspaceId),
    /// One document
    Document {
        /// Owning workspace
        workspace: WorkspaceId,
        /// Document id
        id: EntityId,
    },
    /// One folder
    Folder {
        /// Owning workspace
        workspace: WorkspaceId,
        /// Folder id
        id: EntityId,
    },
}

impl Route {
    /// Parse a location path
    ///
    /// # Errors
    /// Returns `NavigationError::UnknownRoute` if the path has no known shape
    pub fn parse(location: &str) -> Result<Self, NavigationError> {
        let path = location.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let unknown = || NavigationError::UnknownRoute(location.to_string());
        match segments.as_slice() {
            ["w", ws] => Ok(Self::Workspace(WorkspaceId::new(*ws))),
            ["w", ws, "doc", id] => Ok(Self::Document {
                workspace: WorkspaceId::new(*ws),
                id: EntityId::new(*id),
            }),
            ["w", ws, "folder", id] => Ok(Self::Folder {
                workspace: WorkspaceId::new(*ws),
                id: EntityId::new(*id),
            }),
            _ => Err(unknown()),
        }
    }

    /// Workspace the route belongs to
    #[must_use]
    pub fn workspace(&self) -> &WorkspaceId {
        match self {
            Self::Workspace(ws) | Self::Document { workspace: ws, .. } | Self::Folder { workspace: ws, .. } => ws,
        }
    }

    /// Document the route shows, if any
    #[must_use]
    pub fn document(&self) -> Option<&EntityId> {
        match self {
            Self::Document { id, .. } => Some(id),
            _ => None,
        }
    }

    fn rekey(&mut self, kind: EntityKind, from: &EntityId, to: &EntityId) -> bool {
        match self {
            Self::Document { id, .. } if kind == EntityKind::Document && id == from => {
                *id = to.clone();
                true
            }
            Self::Folder { id, .. } if kind == EntityKind::Folder && id == from => {
                *id = to.clone();
                true
            }
            _ => false,
        }
    }
}

impl FromStr for Route {
    type Err = NavigationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace(ws) => write!(f, "/w/{ws}"),
            Self::Document { workspace, id } => write!(f, "/w/{workspace}/doc/{id}"),
            Self::Folder { workspace, id } => write!(f, "/w/{workspace}/folder/{id}"),
        }
    }
}

/// One step of a breadcrumb trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    /// Entity kind
    pub kind: EntityKind,
    /// Entity id
    pub id: EntityId,
    /// Title at the time the trail was built
    pub title: String,
}

/// Root-first trail ending at the given entity
///
/// An unknown entity yields an empty trail. A parent that is not cached
/// ends the walk as if it were the root.
///
/// # Errors
/// - `NavigationError::Cycle` if a folder is reached twice
/// - `NavigationError::TooDeep` if more than `max_depth` folders are walked
pub fn breadcrumbs(
    store: &CacheStore,
    kind: EntityKind,
    id: &EntityId,
    max_depth: usize,
) -> Result<Vec<Breadcrumb>, NavigationError> {
    let mut trail = Vec::new();
    let mut next_folder = match kind {
        EntityKind::Document => {
            let Some(entry) = store.get_document(id) else {
                return Ok(trail);
            };
            trail.push(Breadcrumb {
                kind,
                id: id.clone(),
                title: entry.data.title,
            });
            entry.data.folder_id
        }
        EntityKind::Folder => Some(id.clone()),
        EntityKind::Source => {
            let Some(entry) = store.get_source(id) else {
                return Ok(trail);
            };
            trail.push(Breadcrumb {
                kind,
                id: id.clone(),
                title: entry.data.name,
            });
            None
        }
    };

    let mut visited = HashSet::new();
    while let Some(folder_id) = next_folder {
        if !visited.insert(folder_id.clone()) {
            tracing::warn!(folder = %folder_id, "folder parent cycle");
            return Err(NavigationError::Cycle(folder_id));
        }
        if visited.len() > max_depth {
            return Err(NavigationError::TooDeep {
                id: folder_id,
                max_depth,
            });
        }
        let Some(folder) = store.get_folder(&folder_id) else {
            break;
        };
        trail.push(Breadcrumb {
            kind: EntityKind::Folder,
            id: folder_id,
            title: folder.data.name,
        });
        next_folder = folder.data.parent_folder_id;
    }
    trail.reverse();
    Ok(trail)
}

/// Current navigation target for the active workspace
pub struct DocumentRouter {
    store: Arc<CacheStore>,
    workspace: WorkspaceId,
    max_depth: usize,
    current: Arc<Mutex<Route>>,
    prefetch: Option<PrefetchScheduler>,
    _follow: Vec<Subscription>,
}

impl fmt::Debug for DocumentRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRouter")
            .field("workspace", &self.workspace)
            .field("current", &*self.current.lock())
            .finish_non_exhaustive()
    }
}

impl DocumentRouter {
    /// Router starting at the workspace overview
    #[must_use]
    pub fn new(store: Arc<CacheStore>, workspace: WorkspaceId, max_depth: usize) -> Self {
        let current = Arc::new(Mutex::new(Route::Workspace(workspace.clone())));
        let follow = [EntityKind::Document, EntityKind::Folder]
            .into_iter()
            .map(|kind| {
                let weak: Weak<Mutex<Route>> = Arc::downgrade(&current);
                store.subscribe(Topic::all(kind), move |event: &CacheEvent| {
                    let Change::Rekeyed { from, .. } = &event.change else {
                        return;
                    };
                    let Some(current) = weak.upgrade() else {
                        return;
                    };
                    if current.lock().rekey(event.kind, from, &event.id) {
                        tracing::debug!(from = %from, to = %event.id, "route followed new id");
                    }
                })
            })
            .collect();
        Self {
            current,
            store,
            workspace,
            max_depth,
            prefetch: None,
            _follow: follow,
        }
    }

    /// Cancel document prefetches through this scheduler when navigating away
    #[must_use]
    pub fn with_prefetch(mut self, scheduler: PrefetchScheduler) -> Self {
        self.prefetch = Some(scheduler);
        self
    }

    /// Parse a location and check it belongs to the active workspace
    ///
    /// # Errors
    /// - `NavigationError::UnknownRoute` for an unrecognised path
    /// - `NavigationError::WrongWorkspace` for another workspace's route
    pub fn resolve(&self, location: &str) -> Result<Route, NavigationError> {
        let route = Route::parse(location)?;
        if route.workspace() != &self.workspace {
            return Err(NavigationError::WrongWorkspace {
                active: self.workspace.clone(),
                found: route.workspace().clone(),
            });
        }
        Ok(route)
    }

    /// Move to a location
    ///
    /// Leaving a document cancels its queued or in-flight prefetch.
    ///
    /// # Errors
    /// Same as [`DocumentRouter::resolve`]; the current route is unchanged
    pub fn navigate(&self, location: &str) -> Result<Route, NavigationError> {
        let route = self.resolve(location)?;
        let previous = std::mem::replace(&mut *self.current.lock(), route.clone());
        if let (Some(left), Some(scheduler)) = (previous.document(), &self.prefetch) {
            if route.document() != Some(left) {
                scheduler.cancel(left);
            }
        }
        tracing::debug!(from = %previous, to = %route, "navigated");
        Ok(route)
    }

    /// Current route
    #[must_use]
    pub fn current(&self) -> Route {
        self.current.lock().clone()
    }

    /// Breadcrumbs for the current route
    ///
    /// # Errors
    /// See [`breadcrumbs`]
    pub fn breadcrumbs(&self) -> Result<Vec<Breadcrumb>, NavigationError> {
        self.breadcrumbs_for(&self.current())
    }

    /// Breadcrumbs for any route of this workspace
    ///
    /// # Errors
    /// See [`breadcrumbs`]
    pub fn breadcrumbs_for(&self, route: &Route) -> Result<Vec<Breadcrumb>, NavigationError> {
        match route {
            Route::Workspace(_) => Ok(Vec::new()),
            Route::Document { id, .. } => breadcrumbs(&self.store, EntityKind::Document, id, self.max_depth),
            Route::Folder { id, .. } => breadcrumbs(&self.store, EntityKind::Folder, id, self.max_depth),
        }
    }
}
