// src/transport/endpoint.rs

use crate::error::MuxError;
#[cfg(all(unix, feature = "ipc"))]
use std::path::PathBuf;
use std::fmt;

/// Represents a parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
  /// `host:port`, resolved at connect/bind time so hostnames are allowed.
  Tcp(String),
  #[cfg(all(unix, feature = "ipc"))]
  Ipc(PathBuf),
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
      #[cfg(all(unix, feature = "ipc"))]
      Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
    }
  }
}

/// Parses an endpoint string into a structured Endpoint enum.
///
/// Accepts `tcp://host:port`, a bare `host:port` (treated as TCP), and
/// `ipc:///path` on Unix when the `ipc` feature is enabled.
pub fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, MuxError> {
  let invalid_endpoint_err = || MuxError::InvalidEndpoint(endpoint_str.to_string());

  let (scheme, address_part) = match endpoint_str.find("://") {
    Some(separator_pos) => (&endpoint_str[..separator_pos], &endpoint_str[separator_pos + 3..]),
    None => ("tcp", endpoint_str),
  };

  match scheme {
    "tcp" => {
      // Require a non-empty host part (or bracketed IPv6) and a numeric port.
      let (host, port) = address_part.rsplit_once(':').ok_or_else(invalid_endpoint_err)?;
      if port.parse::<u16>().is_err() || host.contains('\0') {
        tracing::debug!("Failed to parse TCP address: {}", address_part);
        return Err(invalid_endpoint_err());
      }
      if host.is_empty() {
        // ":9000" means all interfaces, as with Go-style listen addresses.
        return Ok(Endpoint::Tcp(format!("0.0.0.0:{}", port)));
      }
      Ok(Endpoint::Tcp(address_part.to_string()))
    }

    #[cfg(all(unix, feature = "ipc"))]
    "ipc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid_endpoint_err())
      } else {
        Ok(Endpoint::Ipc(PathBuf::from(address_part)))
      }
    }

    // Handle schemes disabled by features or unknown schemes
    _ => Err(MuxError::UnsupportedTransport(endpoint_str.to_string())),
  }
}
