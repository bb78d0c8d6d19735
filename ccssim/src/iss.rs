//! Simulated ISS

use std::sync::Mutex;

use log::info;
use ccsmsg::{CcsResult, FitsCard, FitsValue, IssCommand, IssDoneData, IssRequest};

use crate::sky::SkyModel;

pub fn handle(sky: &Mutex<SkyModel>, command: &IssCommand) -> CcsResult<IssDoneData> {
    let mut sky = sky.lock().unwrap_or_else(|e| e.into_inner());
    info!("ISS {} ({})", command.request.name(), command.sequence);

    Ok(match command.request {
        IssRequest::SetFocus { focus_mm } => {
            sky.focus_mm = focus_mm;
            IssDoneData::Focus { focus_mm }
        }
        IssRequest::OffsetRaDec { ra_arcsec, dec_arcsec } => {
            sky.ra_offset_arcsec = ra_arcsec;
            sky.dec_offset_arcsec = dec_arcsec;
            IssDoneData::Empty
        }
        IssRequest::GetFits => IssDoneData::Fits { cards: fits_cards(&sky) },
    })
}

fn fits_cards(sky: &SkyModel) -> Vec<FitsCard> {
    vec![
        FitsCard::new(
            "TELESCOP",
            FitsValue::String("Simulated Telescope".to_string()),
            "Telescope name",
        ),
        FitsCard::new("TELFOCUS", FitsValue::Float(sky.focus_mm), "[mm] Telescope focus"),
        FitsCard::new("RAOFFSET", FitsValue::Float(sky.ra_offset_arcsec), "[arcsec] RA offset"),
        FitsCard::new("DECOFFST", FitsValue::Float(sky.dec_offset_arcsec), "[arcsec] Dec offset"),
        FitsCard::new("AIRMASS", FitsValue::Float(1.0), "Airmass"),
    ]
}
