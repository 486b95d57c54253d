//! Wire-ish value types shared across the attachment core.
//!
//! These are the pieces of the CNI result/config vocabulary the core still
//! touches (an interface description, a route, a MAC address) even though
//! CNI stdin/stdout framing itself is a collaborator's job (spec.md §1).

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;
use ipnetwork::IpNetwork;
use macaddr::{MacAddr6, ParseError};
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An interface the core created, in the shape a CNI dispatcher would echo
/// back to the runtime.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<PathBuf>,
}

/// An additional route to install, e.g. one of `Setup`'s `extra_routes`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub dst: IpNetwork,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

#[derive(Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
pub struct MacAddr(macaddr::MacAddr6);

impl From<MacAddr6> for MacAddr {
    fn from(m: MacAddr6) -> Self {
        Self(m)
    }
}

impl From<MacAddr> for MacAddr6 {
    fn from(m: MacAddr) -> Self {
        m.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MacAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddr6::from_str(s).map(Self)
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(MacAddr6::from(bytes))
    }
}

impl TryFrom<&[u8]> for MacAddr {
    type Error = anyhow::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self::default());
        }
        if value.len() != 6 {
            bail!("invalid mac address");
        }
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(value);
        Ok(Self::from(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let j = String::deserialize(deserializer)?;
        Self::from_str(&j).map_err(Error::custom)
    }
}
