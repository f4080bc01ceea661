use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// The network context of a node in the service graph.
///
/// Both schema generations share this type: v1 attaches it to every
/// annotation, v2 carries it once as the local or remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Lower-case label of this node in the service graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Endpoint {
    /// Creates an endpoint for a service; the name is lower-cased and an
    /// empty name is treated as absent.
    pub fn new(service_name: impl AsRef<str>) -> Self {
        Self {
            service_name: normalize_service_name(service_name.as_ref()),
            ..Self::default()
        }
    }

    pub fn with_ipv4(mut self, ipv4: Ipv4Addr) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    pub fn with_ipv6(mut self, ipv6: Ipv6Addr) -> Self {
        // mapped v4 addresses belong in the ipv4 slot
        match ipv6.to_ipv4_mapped() {
            Some(v4) if self.ipv4.is_none() => self.ipv4 = Some(v4),
            Some(_) => {}
            None if ipv6.is_unspecified() => {}
            None => self.ipv6 = Some(ipv6),
        }
        self
    }

    /// Sets the port; zero means unknown.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = (port != 0).then_some(port);
        self
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Re-applies the constructor rules to a decoded endpoint.
    pub(crate) fn normalized(mut self) -> Self {
        self.service_name = self
            .service_name
            .as_deref()
            .and_then(normalize_service_name);
        if self.port == Some(0) {
            self.port = None;
        }
        if let Some(ipv6) = self.ipv6.take() {
            self = self.with_ipv6(ipv6);
        }
        self
    }
}

fn normalize_service_name(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}
