//! Data pipeline (DpRt) client

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use ccslib::RpcClient;
use ccsmsg::{CcsError, CcsResult, DoneReply, DpRtCommand, DpRtRequest, ReductionResult};

use crate::config::PeerConfig;

/// Reductions the server asks for
pub trait Pipeline: Send + Sync {
    /// Seeing, counts and photometricity of a science frame
    fn expose_reduce(&self, filename: &Path) -> CcsResult<ReductionResult>;

    /// Mean counts of a calibration frame
    fn calibrate_reduce(&self, filename: &Path) -> CcsResult<ReductionResult>;
}

pub struct DpRtPipeline {
    rpc: RpcClient,
    sequence: AtomicU32,
}

impl DpRtPipeline {
    pub fn new(config: &PeerConfig) -> Self {
        Self {
            rpc: RpcClient::new(config.address).with_timeout(config.timeout),
            sequence: AtomicU32::new(1),
        }
    }

    fn send(&self, request: DpRtRequest) -> CcsResult<ReductionResult> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!("DpRt reduce {} ({})", request.filename(), sequence);
        let command = DpRtCommand::new(sequence, request);
        let done: DoneReply<ReductionResult> = self.rpc.call(&command, sequence)?;
        if !done.is_success() {
            return Err(CcsError::Pipeline(done.header.error_num, done.header.error_string));
        }
        Ok(done.data)
    }
}

fn filename_string(filename: &Path) -> String {
    filename.to_string_lossy().into_owned()
}

impl Pipeline for DpRtPipeline {
    fn expose_reduce(&self, filename: &Path) -> CcsResult<ReductionResult> {
        self.send(DpRtRequest::ExposeReduce { filename: filename_string(filename) })
    }

    fn calibrate_reduce(&self, filename: &Path) -> CcsResult<ReductionResult> {
        self.send(DpRtRequest::CalibrateReduce { filename: filename_string(filename) })
    }
}
