use std::path::Path;

use ccdi_imager_interface::{
    AcquiredImage, FrameMetadata, ImageWriter, Timestamp, WriteError, WriteErrorKind,
};
use chrono::{DateTime, Utc};
use fitsio::{
    hdu::FitsHdu,
    images::{ImageDescription, ImageType},
    FitsFile,
};

// ============================================ PUBLIC =============================================

/// Writes frames as single HDU 16-bit FITS files.
#[derive(Default)]
pub struct FitsImageWriter {}

impl FitsImageWriter {
    pub fn new() -> Self {
        Self {}
    }
}

impl ImageWriter for FitsImageWriter {
    fn write_image(
        &mut self,
        path: &Path,
        image: &AcquiredImage,
        metadata: &FrameMetadata,
    ) -> Result<(), WriteError> {
        if path.exists() {
            return Err(WriteError::new(
                WriteErrorKind::Create,
                format!("{} already exists", path.display()),
            ));
        }

        let description = ImageDescription {
            data_type: ImageType::UnsignedShort,
            dimensions: &[image.height, image.width],
        };

        let mut file = FitsFile::create(path)
            .with_custom_primary(&description)
            .open()
            .map_err(error(WriteErrorKind::Create))?;

        let hdu = file.primary_hdu().map_err(error(WriteErrorKind::Create))?;
        hdu.write_image(&mut file, &image.data[..])
            .map_err(error(WriteErrorKind::Data))?;
        write_header(&mut file, &hdu, metadata).map_err(error(WriteErrorKind::Header))?;

        Ok(())
    }
}

// =========================================== PRIVATE =============================================

fn error(kind: WriteErrorKind) -> impl Fn(fitsio::errors::Error) -> WriteError {
    move |err| WriteError::new(kind, err.to_string())
}

fn write_header(
    file: &mut FitsFile,
    hdu: &FitsHdu,
    meta: &FrameMetadata,
) -> fitsio::errors::Result<()> {
    hdu.write_key(file, "INSTRUME", meta.instrument.as_str())?;
    hdu.write_key(file, "TELESCOP", meta.telescope.as_str())?;
    hdu.write_key(file, "GRPUID", meta.group_id.as_str())?;
    hdu.write_key(file, "PROPID", meta.proposal_id.as_str())?;
    hdu.write_key(file, "OBSTYPE", meta.exposure_type.as_str())?;
    hdu.write_key(file, "RUNNUM", meta.multirun as i64)?;
    hdu.write_key(file, "EXPNUM", meta.run as i64)?;
    hdu.write_key(file, "WINDOW", meta.window as i64)?;
    hdu.write_key(file, "EXPIDX", meta.image_index as i64)?;
    hdu.write_key(file, "EXPTOTAL", meta.image_count as i64)?;
    hdu.write_key(file, "CCDXBIN", meta.binning as i64)?;
    hdu.write_key(file, "CCDYBIN", meta.binning as i64)?;
    hdu.write_key(file, "EXPTIME", meta.corrected_exposure)?;
    hdu.write_key(file, "EDEXPTIM", meta.requested_exposure)?;
    hdu.write_key(file, "MRSTART", utc_string(meta.multirun_start))?;
    hdu.write_key(file, "DATE-OBS", utc_string(meta.exposure_start))?;
    hdu.write_key(file, "UTSTART", utc_string(meta.exposure_start))?;
    hdu.write_key(file, "UTEND", utc_string(meta.exposure_end))?;
    hdu.write_key(file, "MJD", modified_julian_date(meta.exposure_start))?;
    hdu.write_key(file, "MEDIAN", meta.median)?;
    hdu.write_key(file, "CCDATEMP", meta.ccd_temperature)?;
    hdu.write_key(file, "HSSPEED", meta.horizontal_shift_speed)?;
    hdu.write_key(file, "VSSPEED", meta.vertical_shift_speed)?;
    hdu.write_key(file, "NTPTIME", meta.ntp_time.as_str())?;
    hdu.write_key(file, "NTPSERVE", meta.ntp_server.as_str())?;
    hdu.write_key(file, "NTPERROR", meta.ntp_drift)?;
    Ok(())
}

fn utc_string(timestamp: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(timestamp.seconds, timestamp.nanoseconds as u32)
        .map(|time| time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn modified_julian_date(timestamp: Timestamp) -> f64 {
    // 1970-01-01 is MJD 40587
    40587.0 + timestamp.as_seconds_f64() / 86400.0
}

// ============================================= TESTS =============================================
