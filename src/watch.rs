//! The central entity of the library: a registered intent to be notified of specific
//! conditions on a specific resource.

use std::any::Any;
use std::fmt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::Arc;

use crate::mask::Mask;

/// A stable integer identifier for a [`Watch`], unique across the process lifetime.
///
/// For [`WatchKind::Signal`] watches, the descriptor is exactly the signal number. For every
/// other kind it is drawn from a monotonically increasing counter that never reuses a value.
pub type Descriptor = i32;

/// An opaque, reference-counted user argument threaded through to a [`Callback`].
///
/// This is the Rust equivalent of the C library's `void *arg`: a value the caller supplies at
/// registration time and gets back, untouched, on every matching event.
pub type Argument = Arc<dyn Any + Send + Sync>;

/// The resource a [`Watch`] describes, tagged by kind.
#[derive(Debug, Clone)]
pub enum WatchKind {
    /// An open file descriptor; can receive `Read`, `Write` and `Close` events.
    Fd(RawFd),

    /// A path to a file or directory; can receive `Attrib`, `Create`, `Delete` and `Modify`
    /// events.
    Vnode(PathBuf),

    /// An interval, in seconds, after which a `Timeout` event fires.
    Timer(u64),

    /// A signal number; traps the signal and converts its delivery into a `Signal` event
    /// instead of the default disposition.
    Signal(libc::c_int),
}

impl WatchKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            WatchKind::Fd(_) => "Fd",
            WatchKind::Vnode(_) => "Vnode",
            WatchKind::Timer(_) => "Timer",
            WatchKind::Signal(_) => "Signal",
        }
    }
}

/// A callback invoked when a matching event occurs.
///
/// The signature is kind-specific, mirroring the distinct parameters the C library passed to
/// each watch kind's callback.
#[derive(Clone)]
pub enum Callback {
    /// `(fd, mask, arg)`
    Fd(Arc<dyn Fn(RawFd, Mask, Argument) + Send + Sync>),

    /// `(descriptor, name, mask, arg)`. `name` is `Some` only for events concerning an entry
    /// within a watched directory.
    Vnode(Arc<dyn Fn(Descriptor, Option<&str>, Mask, Argument) + Send + Sync>),

    /// `(mask, arg)`
    Timer(Arc<dyn Fn(Mask, Argument) + Send + Sync>),

    /// `(signum, arg)`
    Signal(Arc<dyn Fn(libc::c_int, Argument) + Send + Sync>),
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self {
            Callback::Fd(_) => "Fd",
            Callback::Vnode(_) => "Vnode",
            Callback::Timer(_) => "Timer",
            Callback::Signal(_) => "Signal",
        };
        write!(f, "Callback::{}(..)", kind)
    }
}

/// A registered watch.
///
/// Once constructed by [`crate::add_watch`], a `Watch`'s public fields never change; the
/// registry, backend and timer wheel each own their own bookkeeping keyed by
/// [`Watch::descriptor`] rather than mutating the `Watch` itself.
pub struct Watch {
    descriptor: Descriptor,
    kind: WatchKind,
    mask: Mask,
    callback: Option<(Callback, Argument)>,
    /// The descriptor of the directory watch that implicitly created this watch, if any.
    parent: Option<Descriptor>,
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Watch")
            .field("descriptor", &self.descriptor)
            .field("kind", &self.kind)
            .field("mask", &self.mask)
            .field("callback", &self.callback.as_ref().map(|(c, _)| c))
            .field("parent", &self.parent)
            .finish()
    }
}

impl Watch {
    pub(crate) fn new(
        descriptor: Descriptor,
        kind: WatchKind,
        mask: Mask,
        callback: Option<(Callback, Argument)>,
        parent: Option<Descriptor>,
    ) -> Self {
        Watch {
            descriptor,
            kind,
            mask,
            callback,
            parent,
        }
    }

    /// The watch's stable descriptor.
    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    /// The kind of resource this watch monitors.
    pub fn kind(&self) -> &WatchKind {
        &self.kind
    }

    /// The mask of conditions this watch is interested in.
    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// The callback and argument to invoke in dispatch mode, if one was registered.
    pub(crate) fn callback(&self) -> Option<&(Callback, Argument)> {
        self.callback.as_ref()
    }

    /// The descriptor of the parent directory watch, if this watch was auto-created.
    pub fn parent(&self) -> Option<Descriptor> {
        self.parent
    }
}

impl fmt::Display for Watch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Watch({}, {})", self.descriptor, self.kind.name())
    }
}

#[cfg(test)]
mod tests {
    use super::{Mask, Watch, WatchKind};

    #[test]
    fn accessors_reflect_constructor_arguments() {
        let watch = Watch::new(1024, WatchKind::Fd(3), Mask::READ, None, Some(7));

        assert_eq!(watch.descriptor(), 1024);
        assert!(matches!(watch.kind(), WatchKind::Fd(3)));
        assert_eq!(watch.mask(), Mask::READ);
        assert!(watch.callback().is_none());
        assert_eq!(watch.parent(), Some(7));
    }

    #[test]
    fn display_includes_descriptor_and_kind_name() {
        let watch = Watch::new(1024, WatchKind::Timer(5), Mask::TIMEOUT, None, None);
        assert_eq!(watch.to_string(), "Watch(1024, Timer)");
    }
}
