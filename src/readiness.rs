use bitflags::bitflags;

bitflags! {
    /// Level readiness of a transport socket: what could be done right now.
    ///
    /// Queried from the transport at any time; contrast with the socket's
    /// pollable descriptor, which only edges when this bitmask *may* have
    /// transitioned and never says in which direction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Readiness: u8 {
        /// At least one message can be received without blocking.
        const READABLE = 0b01;
        /// At least one message can be sent without blocking.
        const WRITABLE = 0b10;
    }
}

impl Readiness {
    /// True if anything at all is pending.
    #[inline(always)]
    pub fn any(&self) -> bool {
        !self.is_empty()
    }

    #[inline(always)]
    pub fn readable(&self) -> bool {
        self.contains(Readiness::READABLE)
    }

    #[inline(always)]
    pub fn writable(&self) -> bool {
        self.contains(Readiness::WRITABLE)
    }

    /// Restrict write-readiness to adapters that actually asked for it.
    ///
    /// The hook must not treat a writable-but-unarmed socket as pending,
    /// otherwise the loop would never block while any socket has send
    /// capacity.
    #[inline]
    pub fn masked_for(self, write_armed: bool) -> Readiness {
        if write_armed {
            self
        } else {
            self & Readiness::READABLE
        }
    }
}
