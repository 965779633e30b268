//! Exclusive accelerator residency
//!
//! One accelerator slot is shared by all priors. A level takes a
//! `ResidencyLease` on it for the duration of its sampling; the lease borrows
//! the slot mutably, so a second prior cannot become resident while it lives.
//! Dropping a lease without releasing it (an error unwinding through `?`)
//! still moves the prior back to the host.

use log::{debug, warn};

use crate::error::Result;
use crate::prior::model::{Device, Prior};

/// The single shared compute slot
#[derive(Debug)]
pub struct AcceleratorSlot {
    device: Device,
    resident: Option<usize>,
    leases_granted: usize,
}

impl AcceleratorSlot {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            resident: None,
            leases_granted: 0,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Level whose prior currently holds the slot.
    pub fn resident_level(&self) -> Option<usize> {
        self.resident
    }

    pub fn leases_granted(&self) -> usize {
        self.leases_granted
    }

    /// Move `prior` onto the accelerator for the lifetime of the returned lease.
    pub fn lease<'a>(&'a mut self, prior: &'a dyn Prior) -> Result<ResidencyLease<'a>> {
        prior.move_to_accelerator()?;
        prior.release_transient_memory();

        self.resident = Some(prior.level());
        self.leases_granted += 1;
        debug!("Level {} resident on {:?}", prior.level(), self.device);

        Ok(ResidencyLease {
            slot: self,
            prior,
            released: false,
        })
    }
}

/// Scoped residency of one prior on the accelerator
pub struct ResidencyLease<'a> {
    slot: &'a mut AcceleratorSlot,
    prior: &'a dyn Prior,
    released: bool,
}

impl<'a> ResidencyLease<'a> {
    pub fn prior(&self) -> &'a dyn Prior {
        self.prior
    }

    /// Move the prior back to the host, reporting failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.slot.resident = None;
        let result = self.prior.move_to_host();
        self.prior.release_transient_memory();
        debug!("Level {} released", self.prior.level());
        result
    }
}

impl Drop for ResidencyLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.slot.resident = None;
        if let Err(e) = self.prior.move_to_host() {
            warn!(
                "Failed to move level {} off the accelerator: {}",
                self.prior.level(),
                e
            );
        }
        self.prior.release_transient_memory();
    }
}
