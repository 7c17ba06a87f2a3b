//! Where to connect and as whom.
//!
//! Bus addresses follow the `transport:key=value,key=value` grammar, with
//! several candidates separated by `;`. Only the `unix` transport with a
//! `path` key is supported; other entries are skipped.

use crate::error::{Error, Result};

use log::debug;
use std::env;
use std::fmt;
use std::path::PathBuf;

pub const SESSION_BUS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";
pub const SYSTEM_BUS_ENV: &str = "DBUS_SYSTEM_BUS_ADDRESS";
pub const DEFAULT_SYSTEM_BUS_ADDRESS: &str = "unix:path=/var/run/dbus/system_bus_socket";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusAddress {
    UnixPath(PathBuf),
}

impl BusAddress {
    /// Picks the first supported entry of `address`.
    pub fn parse(address: &str) -> Result<Self> {
        let mut saw_entry = false;
        for entry in address.split(';').filter(|e| !e.is_empty()) {
            saw_entry = true;
            let (transport, params) = entry
                .split_once(':')
                .ok_or_else(|| Error::InvalidAddress(address.to_owned()))?;
            let mut path = None;
            for param in params.split(',').filter(|p| !p.is_empty()) {
                let (key, value) = param
                    .split_once('=')
                    .ok_or_else(|| Error::InvalidAddress(address.to_owned()))?;
                let value = unescape(value).ok_or_else(|| Error::InvalidAddress(address.to_owned()))?;
                if key == "path" {
                    path = Some(value);
                }
            }
            match (transport, path) {
                ("unix", Some(path)) => return Ok(BusAddress::UnixPath(PathBuf::from(path))),
                _ => debug!("skipping unsupported bus address entry {:?}", entry),
            }
        }
        if saw_entry {
            Err(Error::UnsupportedAddress(address.to_owned()))
        } else {
            Err(Error::InvalidAddress(address.to_owned()))
        }
    }

    pub fn session() -> Result<Self> {
        let address =
            env::var(SESSION_BUS_ENV).map_err(|_| Error::MissingEnvironment(SESSION_BUS_ENV))?;
        Self::parse(&address)
    }

    /// The system bus, from the environment or the well-known socket.
    pub fn system() -> Result<Self> {
        match env::var(SYSTEM_BUS_ENV) {
            Ok(address) => Self::parse(&address),
            Err(_) => Self::parse(DEFAULT_SYSTEM_BUS_ADDRESS),
        }
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusAddress::UnixPath(path) => write!(f, "unix:path={}", path.display()),
        }
    }
}

fn unescape(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let digits = bytes.get(i + 1..i + 3)?;
            let mut decoded = [0u8; 1];
            hex::decode_to_slice(digits, &mut decoded).ok()?;
            out.push(decoded[0]);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Everything [`connect`](crate::connection::Connection::connect) needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub address: BusAddress,
    /// Sent during EXTERNAL authentication.
    pub uid: u32,
}

impl ConnectionConfig {
    pub fn new(address: BusAddress) -> Self {
        Self {
            address,
            uid: current_uid(),
        }
    }

    pub fn session() -> Result<Self> {
        Ok(Self::new(BusAddress::session()?))
    }

    pub fn system() -> Result<Self> {
        Ok(Self::new(BusAddress::system()?))
    }
}

fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}
