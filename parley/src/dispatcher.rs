use std::{fmt, sync::Arc};

use crate::{Error, Result};

/// Identity of a target window.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetId(Arc<str>);

impl TargetId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<&TargetId> for TargetId {
    fn from(id: &TargetId) -> Self {
        id.clone()
    }
}

/// A live surface that can host chat-like child items.
///
/// `focus` is a monotonically increasing activation stamp: the window with
/// the highest stamp was focused most recently, and `0` means never
/// focused. Ineligible windows (private windows, for example) must never
/// receive new children.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetWindow {
    id: TargetId,
    eligible: bool,
    focus: u64,
    children: Vec<String>,
    selected: Option<String>,
}

impl TargetWindow {
    pub fn new(id: impl Into<TargetId>) -> Self {
        Self {
            id: id.into(),
            eligible: true,
            focus: 0,
            children: Vec::new(),
            selected: None,
        }
    }

    pub fn with_eligible(mut self, eligible: bool) -> Self {
        self.eligible = eligible;
        self
    }

    pub fn with_focus(mut self, focus: u64) -> Self {
        self.focus = focus;
        self
    }

    pub fn id(&self) -> &TargetId {
        &self.id
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn set_eligible(&mut self, eligible: bool) {
        self.eligible = eligible;
    }

    pub fn focus(&self) -> u64 {
        self.focus
    }

    pub(crate) fn set_focus(&mut self, focus: u64) {
        self.focus = focus;
    }

    // ==================== Children ====================

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn contains(&self, child: &str) -> bool {
        self.children.iter().any(|c| c == child)
    }

    /// The child the window currently shows.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Add a child and select it.
    ///
    /// Returns `false` if the child was already present; it is selected
    /// again but not duplicated.
    pub fn add_child(&mut self, child: impl Into<String>) -> bool {
        let child = child.into();
        let added = !self.contains(&child);
        if added {
            self.children.push(child.clone());
        }
        self.selected = Some(child);
        added
    }

    /// Select an existing child. Returns `false` if it isn't hosted here.
    pub fn select(&mut self, child: &str) -> bool {
        if !self.contains(child) {
            return false;
        }
        self.selected = Some(child.to_string());
        true
    }

    /// Remove a child. The selection moves to the last remaining child.
    pub fn remove_child(&mut self, child: &str) -> bool {
        let Some(index) = self.children.iter().position(|c| c == child) else {
            return false;
        };
        self.children.remove(index);
        if self.selected.as_deref() == Some(child) {
            self.selected = self.children.last().cloned();
        }
        true
    }

    /// Remove every child. Returns how many were removed.
    pub fn remove_all(&mut self) -> usize {
        self.selected = None;
        std::mem::take(&mut self.children).len()
    }
}

/// Rule for picking the window that receives new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectionPolicy {
    /// The most recently focused eligible window.
    #[default]
    MostRecentlyFocused,
    /// The first eligible window in candidate order.
    ExcludeIneligible,
    /// The most recently focused window if eligible, else the previous
    /// selection if it is still present and eligible, else the most
    /// recently focused eligible window.
    FallbackToPrevious,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Chooses which of several live windows new work routes to.
///
/// Focus order comes first, eligibility filters, and the previous
/// selection is the deterministic fallback. Selection fails only when no
/// candidate is eligible at all.
///
/// # Example
///
/// ```rust
/// use parley::{Dispatcher, SelectionPolicy, TargetWindow};
///
/// let mut dispatcher = Dispatcher::new();
/// let w1 = TargetWindow::new("W1").with_focus(2);
/// let w2 = TargetWindow::new("W2").with_focus(1);
///
/// let first = dispatcher
///     .select_target(&[w1.clone(), w2.clone()], SelectionPolicy::MostRecentlyFocused)
///     .unwrap();
/// assert_eq!(first.as_str(), "W1");
///
/// // W1 turns private: fall back instead of failing
/// let w1 = w1.with_eligible(false);
/// let next = dispatcher
///     .select_target(&[w1, w2], SelectionPolicy::FallbackToPrevious)
///     .unwrap();
/// assert_eq!(next.as_str(), "W2");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    previous: Option<TargetId>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last successful selection.
    pub fn previous(&self) -> Option<&TargetId> {
        self.previous.as_ref()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Pick a target among `candidates` and remember it as the previous
    /// selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoEligibleTarget`] if no candidate is eligible.
    pub fn select_target(
        &mut self,
        candidates: &[TargetWindow],
        policy: SelectionPolicy,
    ) -> Result<TargetId> {
        let chosen = match policy {
            SelectionPolicy::MostRecentlyFocused => most_recent(candidates.iter().filter(|w| w.eligible)),
            SelectionPolicy::ExcludeIneligible => candidates.iter().find(|w| w.eligible),
            SelectionPolicy::FallbackToPrevious => self.fallback(candidates),
        };
        let Some(window) = chosen else {
            tracing::debug!(%policy, candidates = candidates.len(), "no eligible target");
            return Err(Error::NoEligibleTarget);
        };
        tracing::trace!(%policy, target = %window.id, "target selected");
        self.previous = Some(window.id.clone());
        Ok(window.id.clone())
    }

    fn fallback<'a>(&self, candidates: &'a [TargetWindow]) -> Option<&'a TargetWindow> {
        if let Some(top) = most_recent(candidates.iter()) {
            if top.eligible {
                return Some(top);
            }
        }
        let previous = self
            .previous
            .as_ref()
            .and_then(|id| candidates.iter().find(|w| w.id == *id && w.eligible));
        previous.or_else(|| most_recent(candidates.iter().filter(|w| w.eligible)))
    }
}

/// Highest focus stamp wins; ties go to the earlier candidate.
fn most_recent<'a>(windows: impl Iterator<Item = &'a TargetWindow>) -> Option<&'a TargetWindow> {
    windows.fold(None, |best: Option<&TargetWindow>, w| match best {
        Some(b) if b.focus >= w.focus => Some(b),
        _ => Some(w),
    })
}
