//! Tests for error handling

use std::io;

use ntodbg_core::error::{NtoError, Result};
use ntodbg_core::types::ProcessId;
use ntodbg_protocol::{PdebugErrorCode, ProtocolError};

#[test]
fn test_attach_failed_display()
{
    let error = NtoError::AttachFailed {
        pid: ProcessId(12345),
        reason: "no such process".to_string(),
    };
    let message = format!("{}", error);
    assert!(message.contains("12345"));
    assert!(message.contains("no such process"));
}

#[test]
fn test_devctl_keeps_request_name_and_errno()
{
    let error = NtoError::Devctl {
        request: "DCMD_PROC_GETGREG",
        source: io::Error::from_raw_os_error(3),
    };
    let message = format!("{}", error);
    assert!(message.starts_with("DCMD_PROC_GETGREG failed"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_target_error_converts_from_protocol()
{
    let protocol = ProtocolError::Target {
        errno: 1,
        reason: PdebugErrorCode::ProcStop,
    };
    let error: NtoError = protocol.into();
    match error {
        NtoError::Protocol(ProtocolError::Target { errno, reason }) => {
            assert_eq!(errno, 1);
            assert_eq!(reason, PdebugErrorCode::ProcStop);
        }
        other => panic!("Expected target error, got {other:?}"),
    }
}

#[test]
fn test_invalid_register_range_display()
{
    let error = NtoError::InvalidRegisterRange { first: 9, last: 3 };
    assert_eq!(format!("{}", error), "Invalid register range 9..=3");
}

#[test]
fn test_io_error_converts()
{
    let error: NtoError = io::Error::new(io::ErrorKind::NotFound, "core").into();
    assert!(matches!(error, NtoError::Io(_)));
}

#[test]
fn test_result_type()
{
    let _result: Result<()> = Ok(());
    let _error_result: Result<()> = Err(NtoError::NotAttached);
}
