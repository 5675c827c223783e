use crate::Opts;
use crate::error::Error;
use crate::constant::{CAPABILITIES_DEFAULT, CapabilityFlags, ServerStatusFlags};
use crate::protocol::response::Framing;

#[test]
fn default_opts() {
    let opts = Opts::default();
    assert_eq!(opts.capabilities, CAPABILITIES_DEFAULT);
    assert_eq!(opts.status_flags, ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT);
    assert_eq!(opts.fetch_batch_size, 256);
    assert_eq!(opts.max_rows, 10_000);
    assert_eq!(
        Framing::from_capabilities(opts.capabilities),
        Framing::DeprecateEof
    );
}

#[test]
fn legacy_eof() {
    let opts = Opts::default().legacy_eof();
    assert!(!opts.capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));
    assert!(opts.capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
    assert_eq!(Framing::from_capabilities(opts.capabilities), Framing::Legacy);
}

#[test]
fn with_capabilities() {
    let opts = Opts::default().with_capabilities(CapabilityFlags::CLIENT_PROTOCOL_41);
    assert_eq!(opts.capabilities, CapabilityFlags::CLIENT_PROTOCOL_41);
}

#[test]
fn validate() {
    assert!(Opts::default().validate().is_ok());
    assert!(Opts::default().legacy_eof().validate().is_ok());

    let opts = Opts::default().with_capabilities(CapabilityFlags::CLIENT_DEPRECATE_EOF);
    assert!(matches!(opts.validate(), Err(Error::BadConfigError(_))));

    let opts = Opts {
        fetch_batch_size: 0,
        ..Opts::default()
    };
    assert!(matches!(opts.validate(), Err(Error::BadConfigError(_))));
}
