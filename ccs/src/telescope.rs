//! Telescope (ISS) client

use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};
use ccslib::RpcClient;
use ccsmsg::{CcsError, CcsResult, DoneReply, FitsCard, IssCommand, IssDoneData, IssRequest};

use crate::config::PeerConfig;

/// What the server asks of the telescope
pub trait Telescope: Send + Sync {
    /// Move the focus and return the position reached
    fn set_focus(&self, focus_mm: f64) -> CcsResult<f64>;

    /// Offset the pointing from the current target
    fn offset_ra_dec(&self, ra_arcsec: f64, dec_arcsec: f64) -> CcsResult<()>;

    /// Header cards describing the telescope
    fn get_fits(&self) -> CcsResult<Vec<FitsCard>>;
}

/// Telescope reached over the ISS command protocol
pub struct IssTelescope {
    rpc: RpcClient,
    sequence: AtomicU32,
}

impl IssTelescope {
    pub fn new(config: &PeerConfig) -> Self {
        Self {
            rpc: RpcClient::new(config.address).with_timeout(config.timeout),
            sequence: AtomicU32::new(1),
        }
    }

    fn send(&self, request: IssRequest) -> CcsResult<IssDoneData> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!("ISS {} ({}) to {}", request.name(), sequence, self.rpc.address());
        let command = IssCommand::new(sequence, request);
        let done: DoneReply<IssDoneData> = self.rpc.call(&command, sequence)?;
        if !done.is_success() {
            return Err(CcsError::Telescope(done.header.error_num, done.header.error_string));
        }
        Ok(done.data)
    }
}

impl Telescope for IssTelescope {
    fn set_focus(&self, focus_mm: f64) -> CcsResult<f64> {
        match self.send(IssRequest::SetFocus { focus_mm })? {
            IssDoneData::Focus { focus_mm } => {
                info!("Telescope focus now {:.3} mm", focus_mm);
                Ok(focus_mm)
            }
            _ => Ok(focus_mm),
        }
    }

    fn offset_ra_dec(&self, ra_arcsec: f64, dec_arcsec: f64) -> CcsResult<()> {
        self.send(IssRequest::OffsetRaDec { ra_arcsec, dec_arcsec })?;
        Ok(())
    }

    fn get_fits(&self) -> CcsResult<Vec<FitsCard>> {
        match self.send(IssRequest::GetFits)? {
            IssDoneData::Fits { cards } => Ok(cards),
            other => Err(CcsError::Protocol(format!("GET_FITS answered with {:?}", other))),
        }
    }
}
