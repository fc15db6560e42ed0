use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use tokio::sync::Notify;

use crate::{Config, Dispatcher, Error, Result, SelectionPolicy, TargetId, TargetWindow};

#[derive(Default)]
struct Windows {
    open: Vec<TargetWindow>,
    focus_clock: u64,
}

impl Windows {
    fn get_mut(&mut self, id: &TargetId) -> Result<&mut TargetWindow> {
        self.open
            .iter_mut()
            .find(|w| w.id() == id)
            .ok_or_else(|| Error::UnknownTarget(id.clone()))
    }

    fn tick(&mut self) -> u64 {
        self.focus_clock += 1;
        self.focus_clock
    }
}

/// The shared, mutable state scenarios observe: live windows, the chat-like
/// children they host, and the dispatcher that routes new children.
///
/// It is passed to the [`Runner`](crate::Runner) as (part of) the context
/// and threaded explicitly into every step, never kept as a global.
/// Clones share the same state. Every mutation fires
/// [`changed`](Self::changed), so condition waiters can wake up on change
/// instead of polling.
///
/// # Example
///
/// ```rust
/// use parley::{HarnessContext, SelectionPolicy};
///
/// let ctx = HarnessContext::default();
/// ctx.open_window("main", true).unwrap();
/// ctx.open_window("private", false).unwrap();
///
/// // the private window has focus but may not host chats
/// let host = ctx.host("chat-1", SelectionPolicy::FallbackToPrevious).unwrap();
/// assert_eq!(host.as_str(), "main");
/// assert_eq!(ctx.child_count(), 1);
/// ```
#[derive(Clone)]
pub struct HarnessContext {
    config: Config,
    windows: Rc<RefCell<Windows>>,
    dispatcher: Rc<RefCell<Dispatcher>>,
    changed: Arc<Notify>,
}

impl Default for HarnessContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl HarnessContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            windows: Rc::default(),
            dispatcher: Rc::default(),
            changed: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fires after every change to windows or children.
    pub fn changed(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Windows) -> Result<T>) -> Result<T> {
        let result = f(&mut self.windows.borrow_mut());
        if result.is_ok() {
            self.changed.notify_waiters();
        }
        result
    }

    // ==================== Windows ====================

    /// Open a window. It takes focus.
    pub fn open_window(&self, id: impl Into<TargetId>, eligible: bool) -> Result<TargetId> {
        let id = id.into();
        self.mutate(|windows| {
            if windows.open.iter().any(|w| *w.id() == id) {
                return Err(Error::DuplicateTarget(id.clone()));
            }
            let focus = windows.tick();
            windows.open.push(
                TargetWindow::new(id.clone())
                    .with_eligible(eligible)
                    .with_focus(focus),
            );
            tracing::debug!(window = %id, eligible, "window opened");
            Ok(id.clone())
        })
    }

    /// Close a window along with every child it hosts.
    pub fn close_window(&self, id: impl Into<TargetId>) -> Result<TargetWindow> {
        let id = id.into();
        self.mutate(|windows| {
            let index = windows
                .open
                .iter()
                .position(|w| *w.id() == id)
                .ok_or_else(|| Error::UnknownTarget(id.clone()))?;
            tracing::debug!(window = %id, "window closed");
            Ok(windows.open.remove(index))
        })
    }

    /// Close every window except `keep`. Returns how many were closed.
    pub fn close_others(&self, keep: impl Into<TargetId>) -> usize {
        let keep = keep.into();
        self.mutate(|windows| {
            let before = windows.open.len();
            windows.open.retain(|w| *w.id() == keep);
            Ok(before - windows.open.len())
        })
        .unwrap_or_default()
    }

    pub fn focus(&self, id: impl Into<TargetId>) -> Result<()> {
        let id = id.into();
        self.mutate(|windows| {
            let focus = windows.tick();
            windows.get_mut(&id)?.set_focus(focus);
            Ok(())
        })
    }

    pub fn set_eligible(&self, id: impl Into<TargetId>, eligible: bool) -> Result<()> {
        let id = id.into();
        self.mutate(|windows| {
            windows.get_mut(&id)?.set_eligible(eligible);
            Ok(())
        })
    }

    pub fn window(&self, id: impl Into<TargetId>) -> Option<TargetWindow> {
        let id = id.into();
        self.windows
            .borrow()
            .open
            .iter()
            .find(|w| *w.id() == id)
            .cloned()
    }

    /// Snapshot of every open window, in opening order.
    pub fn windows(&self) -> Vec<TargetWindow> {
        self.windows.borrow().open.clone()
    }

    pub fn window_count(&self) -> usize {
        self.windows.borrow().open.len()
    }

    /// The most recently focused window, eligible or not.
    pub fn focused(&self) -> Option<TargetId> {
        self.windows
            .borrow()
            .open
            .iter()
            .filter(|w| w.focus() > 0)
            .max_by_key(|w| w.focus())
            .map(|w| w.id().clone())
    }

    // ==================== Routing ====================

    /// Pick a window for new work without changing anything.
    pub fn select_target(&self, policy: SelectionPolicy) -> Result<TargetId> {
        let candidates = self.windows();
        self.dispatcher
            .borrow_mut()
            .select_target(&candidates, policy)
    }

    /// Host a child in the window chosen by `policy`.
    ///
    /// A child that is already hosted somewhere is selected again in its
    /// current window instead of being duplicated.
    pub fn host(&self, child: impl Into<String>, policy: SelectionPolicy) -> Result<TargetId> {
        let child = child.into();
        if let Some(existing) = self.host_of(&child) {
            self.mutate(|windows| {
                windows.get_mut(&existing)?.select(&child);
                Ok(())
            })?;
            tracing::debug!(%child, window = %existing, "child selected again");
            return Ok(existing);
        }
        let target = self.select_target(policy)?;
        self.mutate(|windows| {
            windows.get_mut(&target)?.add_child(child.clone());
            Ok(())
        })?;
        tracing::debug!(%child, window = %target, %policy, "child hosted");
        Ok(target)
    }

    /// The window hosting `child`, if any.
    pub fn host_of(&self, child: &str) -> Option<TargetId> {
        self.windows
            .borrow()
            .open
            .iter()
            .find(|w| w.contains(child))
            .map(|w| w.id().clone())
    }

    /// Remove a child wherever it is hosted.
    pub fn remove_child(&self, child: &str) -> bool {
        self.mutate(|windows| Ok(windows.open.iter_mut().any(|w| w.remove_child(child))))
            .unwrap_or(false)
    }

    /// Remove every child from every window. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        self.mutate(|windows| Ok(windows.open.iter_mut().map(TargetWindow::remove_all).sum()))
            .unwrap_or_default()
    }

    /// Children across all windows.
    pub fn child_count(&self) -> usize {
        self.windows
            .borrow()
            .open
            .iter()
            .map(TargetWindow::child_count)
            .sum()
    }

    pub fn has_children(&self) -> bool {
        self.child_count() > 0
    }

    /// Forget the dispatcher's previous selection.
    pub fn reset_dispatcher(&self) {
        self.dispatcher.borrow_mut().reset();
    }
}

impl fmt::Debug for HarnessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let windows = self.windows.borrow();
        f.debug_struct("HarnessContext")
            .field("windows", &windows.open.len())
            .field("children", &windows.open.iter().map(TargetWindow::child_count).sum::<usize>())
            .field("dispatcher", &self.dispatcher.borrow())
            .finish()
    }
}
