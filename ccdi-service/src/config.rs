use argh::FromArgs;

// ============================================ PUBLIC =============================================

#[derive(FromArgs)]
/// CCD multirun acquisition service
pub struct ServiceArgs {
    /// config file, the per user config.yaml when not given
    #[argh(option)]
    pub config: Option<String>,

    /// write default.yaml next to the per user config and exit
    #[argh(switch)]
    pub create_default_config: bool,

    /// number of images to save
    #[argh(option, default = "1")]
    pub count: u32,

    /// exposure length in seconds
    #[argh(option, default = "1.0")]
    pub exposure: f64,

    /// exposure type code: e, f, b, d or s
    #[argh(option, default = "'e'")]
    pub exposure_type: char,

    /// run an adaptive sky flat series instead of a plain multirun
    #[argh(switch)]
    pub flat: bool,

    /// time budget of a flat series in seconds
    #[argh(option)]
    pub max_duration: Option<f64>,

    /// square binning factor
    #[argh(option, default = "1")]
    pub binning: usize,

    /// enable debug logging
    #[argh(switch)]
    pub debug: bool,

    /// log file
    #[argh(option)]
    pub log: Option<String>,
}
