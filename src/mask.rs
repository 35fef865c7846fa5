//! The bitmask of conditions a [`Watch`](crate::Watch) is interested in, or that an
//! [`Event`](crate::Event) reports.
//!
//! The numeric values are part of the crate's ABI and match the C `pnotify` library this crate's
//! design is descended from, so they must not be renumbered.

bitflags::bitflags! {
    /// A set of event conditions.
    ///
    /// Not every bit is meaningful for every [`WatchKind`](crate::WatchKind); see the
    /// `watch_*` constructors for which bits apply to which kind.
    pub struct Mask: u32 {
        /// The attributes of a file have been modified.
        const ATTRIB  = 0x1 << 0;
        /// A file was created in a watched directory.
        const CREATE  = 0x1 << 1;
        /// A file was deleted from a watched directory.
        const DELETE  = 0x1 << 2;
        /// The contents of a file have changed.
        const MODIFY  = 0x1 << 3;
        /// Data is ready to be read from a file descriptor.
        const READ    = 0x1 << 4;
        /// Data is ready to be written to a file descriptor.
        const WRITE   = 0x1 << 5;
        /// A socket or pipe descriptor was closed by the remote end.
        const CLOSE   = 0x1 << 6;
        /// A timer expired.
        const TIMEOUT = 0x1 << 7;
        /// A signal was received.
        const SIGNAL  = 0x1 << 8;
        /// Cancel the watch after the first matching event.
        const ONESHOT = 0x1 << 30;
        /// An error condition occurred on the underlying kernel event source.
        const ERROR   = 0x1 << 31;
    }
}

impl Default for Mask {
    /// The default mask is empty; callers build up interest with `|`.
    fn default() -> Self {
        Mask::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Mask;

    #[test]
    fn abi_values_are_fixed() {
        assert_eq!(Mask::ATTRIB.bits(), 0x1);
        assert_eq!(Mask::CREATE.bits(), 0x2);
        assert_eq!(Mask::DELETE.bits(), 0x4);
        assert_eq!(Mask::MODIFY.bits(), 0x8);
        assert_eq!(Mask::READ.bits(), 0x10);
        assert_eq!(Mask::WRITE.bits(), 0x20);
        assert_eq!(Mask::CLOSE.bits(), 0x40);
        assert_eq!(Mask::TIMEOUT.bits(), 0x80);
        assert_eq!(Mask::SIGNAL.bits(), 0x100);
        assert_eq!(Mask::ONESHOT.bits(), 0x4000_0000);
        assert_eq!(Mask::ERROR.bits(), 0x8000_0000);
    }

    #[test]
    fn default_is_empty() {
        assert_eq!(Mask::default(), Mask::empty());
    }
}
