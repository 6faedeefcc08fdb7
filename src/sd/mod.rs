//! DNS-based service discovery over unicast DNS.
//!
//! Lookups walk the PTR → SRV + TXT chains of RFC 6763; publication builds
//! signed RFC 2136 updates. Domains can be configured explicitly or
//! discovered from reverse lookups on the host's external addresses.

mod txt;
mod update;

pub use txt::{read_attributes, write_attributes};
pub use update::UpdateBuilder;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::rc::Rc;

use futures::future;
use log::{debug, trace, warn};
use rand::Rng;
use thiserror::Error;

use crate::dns::{class, rtype, Message, Name, RData};
use crate::resolver::{ResolverError, ResolverSocket};
use crate::tsig::TsigSigner;

const DEFAULT_TTL: u32 = 60;

/// The browsing meta-query name under a domain, per RFC 6763 §9.
fn meta_query_name(domain: &Name) -> Name {
    domain.prepend("_udp").prepend("_dns-sd").prepend("_services")
}

#[derive(Debug, Error)]
pub enum SdError {
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("no search domains are configured and none could be discovered")]
    NoDomains,
    #[error("no service record found for {0}")]
    NoSuchRecord(Name),
    #[error("service port must be in 1..=65535")]
    InvalidPort,
    #[error("could not enumerate network interfaces: {0}")]
    Interfaces(std::io::Error),
}

/// A resolved service instance, put together from its SRV and TXT records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Full instance name, `<instance>.<type>.<domain>.`.
    pub service_name: Name,
    /// `<type>.<domain>.`
    pub service_type: Name,
    /// The instance label alone.
    pub endpoint: String,
    /// SRV target host.
    pub hostname: Name,
    pub port: u16,
    pub metadata: BTreeMap<String, String>,
}

/// Service discovery interface over one resolver socket.
pub struct ServiceDiscovery {
    resolver: Rc<ResolverSocket>,
    browsing_domains: Vec<Name>,
    registration_domains: Vec<Name>,
    signer: Option<TsigSigner>,
    ttl: u32,
}

impl ServiceDiscovery {
    pub fn new(resolver: Rc<ResolverSocket>) -> ServiceDiscovery {
        ServiceDiscovery {
            resolver,
            browsing_domains: Vec::new(),
            registration_domains: Vec::new(),
            signer: None,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_browsing_domains(mut self, domains: Vec<Name>) -> ServiceDiscovery {
        self.browsing_domains = domains;
        self
    }

    pub fn with_registration_domains(mut self, domains: Vec<Name>) -> ServiceDiscovery {
        self.registration_domains = domains;
        self
    }

    pub fn with_signer(mut self, signer: TsigSigner) -> ServiceDiscovery {
        self.signer = Some(signer);
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> ServiceDiscovery {
        self.ttl = ttl;
        self
    }

    /// All service types advertised across the browsing domains.
    pub async fn lookup_types(&self) -> Result<Vec<Name>, SdError> {
        let domains = self.search_domains(&self.browsing_domains).await?;
        let mut types = Vec::new();
        let mut first_error = None;
        for domain in &domains {
            let query = Message::query(
                self.resolver.allocate_id(),
                meta_query_name(domain),
                rtype::PTR,
                class::IN,
            );
            match self.resolver.send(&query).await {
                Ok(response) => types.extend(ptr_targets(&response)),
                Err(err) => {
                    debug!("type lookup in {} failed: {}", domain, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match (types.is_empty(), first_error) {
            (true, Some(err)) => Err(err.into()),
            _ => Ok(types),
        }
    }

    /// All instance identifiers of one service type,
    /// `<instance>.<type>.<domain>.`.
    pub async fn lookup_identifiers(&self, service_type: &Name) -> Result<Vec<Name>, SdError> {
        let query = Message::query(
            self.resolver.allocate_id(),
            service_type.clone(),
            rtype::PTR,
            class::IN,
        );
        let response = self.resolver.send(&query).await?;
        Ok(ptr_targets(&response))
    }

    /// Resolve one identifier into a service record.
    ///
    /// SRV and TXT are queried in parallel; of the SRV answers one is chosen
    /// by the RFC 2782 rules, and all TXT attributes are aggregated with
    /// later pairs overriding earlier ones.
    pub async fn lookup_record(&self, identifier: &Name) -> Result<ServiceRecord, SdError> {
        let srv_query = Message::query(
            self.resolver.allocate_id(),
            identifier.clone(),
            rtype::SRV,
            class::IN,
        );
        let txt_query = Message::query(
            self.resolver.allocate_id(),
            identifier.clone(),
            rtype::TXT,
            class::IN,
        );
        let (srv_response, txt_response) = future::try_join(
            self.resolver.send(&srv_query),
            self.resolver.send(&txt_query),
        )
        .await?;

        let candidates: Vec<SrvChoice> = srv_response
            .answers
            .iter()
            .filter_map(|record| match &record.rdata {
                Some(RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }) => Some(SrvChoice {
                    priority: *priority,
                    weight: *weight,
                    port: *port,
                    target: target.clone(),
                }),
                _ => None,
            })
            .collect();
        let chosen = choose_srv(&candidates, rand::thread_rng().gen())
            .ok_or_else(|| SdError::NoSuchRecord(identifier.clone()))?;

        let mut metadata = BTreeMap::new();
        for record in &txt_response.answers {
            if let Some(RData::Txt(strings)) = &record.rdata {
                metadata.extend(read_attributes(strings));
            }
        }

        let endpoint = identifier.labels().next().unwrap_or_default().to_owned();
        let service_type = identifier
            .parent()
            .ok_or_else(|| SdError::NoSuchRecord(identifier.clone()))?;
        Ok(ServiceRecord {
            service_name: identifier.clone(),
            service_type,
            endpoint,
            hostname: chosen.target.clone(),
            port: chosen.port,
            metadata,
        })
    }

    /// Publish one service instance into every registration domain.
    ///
    /// Each domain gets a signed UPDATE carrying an absence prerequisite for
    /// the instance name, the browsing and type PTRs, and the instance SRV
    /// and TXT records. Every update must come back with NOERROR.
    pub async fn publish(
        &self,
        service_type: &str,
        instance: &str,
        hostname: Name,
        port: u16,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), SdError> {
        if port == 0 {
            return Err(SdError::InvalidPort);
        }
        let domains = self.search_domains(&self.registration_domains).await?;
        for domain in &domains {
            let type_name = Name::from_dotted(format!("{}.{}", service_type, domain));
            let instance_name = type_name.prepend(instance);
            trace!("publishing {} into {}", instance_name, domain);

            let mut builder = UpdateBuilder::new(self.resolver.allocate_id(), domain.clone())
                .require_absent(instance_name.clone())
                .add(
                    meta_query_name(domain),
                    rtype::PTR,
                    self.ttl,
                    RData::Ptr(type_name.clone()),
                )
                .add(
                    type_name.clone(),
                    rtype::PTR,
                    self.ttl,
                    RData::Ptr(instance_name.clone()),
                );
            for suffix in type_suffixes(&type_name, domain) {
                builder = builder.add(
                    suffix,
                    rtype::PTR,
                    self.ttl,
                    RData::Ptr(instance_name.clone()),
                );
            }
            builder = builder
                .add(
                    instance_name.clone(),
                    rtype::SRV,
                    self.ttl,
                    RData::Srv {
                        priority: 0,
                        weight: 0,
                        port,
                        target: hostname.clone(),
                    },
                )
                .add(
                    instance_name.clone(),
                    rtype::TXT,
                    self.ttl,
                    RData::Txt(write_attributes(metadata)),
                );
            if let Some(signer) = &self.signer {
                builder = builder.sign_with(signer.clone());
            }
            self.resolver.send(&builder.build()).await?;
        }
        Ok(())
    }

    /// Withdraw a published instance from every registration domain.
    pub async fn unpublish(&self, service_type: &str, instance: &str) -> Result<(), SdError> {
        let domains = self.search_domains(&self.registration_domains).await?;
        for domain in &domains {
            let type_name = Name::from_dotted(format!("{}.{}", service_type, domain));
            let instance_name = type_name.prepend(instance);
            trace!("unpublishing {} from {}", instance_name, domain);

            let mut builder = UpdateBuilder::new(self.resolver.allocate_id(), domain.clone())
                .delete_all(instance_name.clone())
                .delete(type_name, rtype::PTR, RData::Ptr(instance_name));
            if let Some(signer) = &self.signer {
                builder = builder.sign_with(signer.clone());
            }
            self.resolver.send(&builder.build()).await?;
        }
        Ok(())
    }

    /// The configured domains, or domains discovered by reverse lookups on
    /// the external interface addresses.
    async fn search_domains(&self, configured: &[Name]) -> Result<Vec<Name>, SdError> {
        if !configured.is_empty() {
            return Ok(configured.to_vec());
        }
        let interfaces = if_addrs::get_if_addrs().map_err(SdError::Interfaces)?;
        let mut domains = Vec::new();
        for interface in interfaces {
            if interface.is_loopback() {
                continue;
            }
            let query = Message::query(
                self.resolver.allocate_id(),
                reverse_name(interface.ip()),
                rtype::PTR,
                class::IN,
            );
            let response = match self.resolver.send(&query).await {
                Ok(response) => response,
                Err(err) => {
                    debug!("reverse lookup for {} failed: {}", interface.ip(), err);
                    continue;
                }
            };
            for target in ptr_targets(&response) {
                match target.parent() {
                    Some(domain) if !domains.contains(&domain) => {
                        trace!("discovered search domain {}", domain);
                        domains.push(domain);
                    }
                    _ => {}
                }
            }
        }
        if domains.is_empty() {
            warn!("no search domains discovered from interface addresses");
            return Err(SdError::NoDomains);
        }
        Ok(domains)
    }
}

/// PTR targets in the answer section.
fn ptr_targets(response: &Message) -> Vec<Name> {
    response
        .answers
        .iter()
        .filter_map(|record| match &record.rdata {
            Some(RData::Ptr(target)) => Some(target.clone()),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SrvChoice {
    priority: u16,
    weight: u16,
    port: u16,
    target: Name,
}

/// RFC 2782 server selection: minimum priority, then weighted random.
///
/// The cutoff is `(random / 255) × Σweights`; walking the candidates, each
/// weight is subtracted from the running sum and the first candidate that
/// drives the sum at or below the cutoff wins.
fn choose_srv(candidates: &[SrvChoice], random: u8) -> Option<&SrvChoice> {
    let min_priority = candidates.iter().map(|c| c.priority).min()?;
    let group: Vec<&SrvChoice> = candidates
        .iter()
        .filter(|c| c.priority == min_priority)
        .collect();
    let total: u32 = group.iter().map(|c| c.weight as u32).sum();
    let cutoff = f64::from(random) / 255.0 * f64::from(total);
    let mut running = f64::from(total);
    for candidate in &group {
        running -= f64::from(candidate.weight);
        if running <= cutoff {
            return Some(candidate);
        }
    }
    group.last().copied()
}

/// Proper suffixes of the type name above the domain, e.g. the protocol
/// label of a two-label service type.
fn type_suffixes(type_name: &Name, domain: &Name) -> Vec<Name> {
    let mut suffixes = Vec::new();
    let mut current = type_name.parent();
    while let Some(suffix) = current {
        if suffix == *domain {
            break;
        }
        suffixes.push(suffix.clone());
        current = suffix.parent();
    }
    suffixes
}

/// The reverse-lookup name of an address, `in-addr.arpa` or `ip6.arpa`.
fn reverse_name(address: IpAddr) -> Name {
    match address {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            Name::from_dotted(format!("{}.{}.{}.{}.in-addr.arpa.", d, c, b, a))
        }
        IpAddr::V6(v6) => {
            let mut name = String::new();
            for byte in v6.octets().iter().rev() {
                name.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
            }
            name.push_str("ip6.arpa.");
            Name::from_dotted(name)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn candidate(priority: u16, weight: u16, port: u16) -> SrvChoice {
        SrvChoice {
            priority,
            weight,
            port,
            target: Name::from_dotted("node1.example.org."),
        }
    }

    #[test]
    fn choose_srv_prefers_minimum_priority() {
        let candidates = vec![candidate(10, 0, 1), candidate(0, 0, 2), candidate(5, 0, 3)];
        for random in [0u8, 127, 255] {
            assert_eq!(choose_srv(&candidates, random).unwrap().port, 2);
        }
    }

    #[test]
    fn choose_srv_weighted_walk() {
        let candidates = vec![candidate(0, 1, 1), candidate(0, 9, 2)];
        // cutoff = 10 at random 255: the first subtraction (10 - 1 = 9)
        // already lands at or below the cutoff.
        assert_eq!(choose_srv(&candidates, 255).unwrap().port, 1);
        // cutoff = 0 at random 0: only draining both weights reaches it.
        assert_eq!(choose_srv(&candidates, 0).unwrap().port, 2);
    }

    #[test]
    fn choose_srv_empty_is_none() {
        assert!(choose_srv(&[], 0).is_none());
    }

    #[test]
    fn reverse_names() {
        assert_eq!(
            reverse_name(IpAddr::from([192, 168, 1, 9])).as_str(),
            "9.1.168.192.in-addr.arpa."
        );
        let v6 = IpAddr::from([0x2001, 0xdb8, 0, 0, 0, 0, 0, 1]);
        assert!(reverse_name(v6).as_str().ends_with("ip6.arpa."));
        assert!(reverse_name(v6)
            .as_str()
            .starts_with("1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0."));
    }

    #[test]
    fn type_suffixes_stop_at_the_domain() {
        let domain = Name::from_dotted("example.org.");
        let type_name = Name::from_dotted("_http._tcp.example.org.");
        assert_eq!(
            type_suffixes(&type_name, &domain),
            vec![Name::from_dotted("_tcp.example.org.")]
        );
    }

    #[test]
    fn meta_query_name_shape() {
        assert_eq!(
            meta_query_name(&Name::from_dotted("example.org.")).as_str(),
            "_services._dns-sd._udp.example.org."
        );
    }

    #[test]
    fn signed_publish_update_has_deterministic_mac() {
        use crate::dns::{Message, Writer};
        use crate::tsig::{Algorithm, TsigSigner};
        use hmac::{Hmac, Mac};
        use md5::Md5;

        // qBClkn0Qkk6w5DACRllq1w== decoded.
        let secret: [u8; 16] = [
            0xa8, 0x10, 0xa5, 0x92, 0x7d, 0x10, 0x92, 0x4e, 0xb0, 0xe4, 0x30, 0x02, 0x46, 0x59,
            0x6a, 0xd7,
        ];
        let key_name = Name::from_dotted("k.example.org.");
        let domain = Name::from_dotted("example.org.");
        let instance = Name::from_dotted("svc._http._tcp.example.org.");
        let mut metadata = BTreeMap::new();
        metadata.insert("path".to_owned(), "/".to_owned());
        metadata.insert("version".to_owned(), "1".to_owned());

        let unsigned = UpdateBuilder::new(11, domain.clone())
            .require_absent(instance.clone())
            .add(
                meta_query_name(&domain),
                rtype::PTR,
                60,
                RData::Ptr(Name::from_dotted("_http._tcp.example.org.")),
            )
            .add(
                instance.clone(),
                rtype::SRV,
                60,
                RData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 8080,
                    target: Name::from_dotted("node1.example.org."),
                },
            )
            .add(
                instance.clone(),
                rtype::TXT,
                60,
                RData::Txt(write_attributes(&metadata)),
            )
            .build()
            .encode()
            .unwrap();

        let signer = TsigSigner::new(key_name.clone(), Algorithm::Md5, secret.to_vec());
        let mut signed = unsigned.clone();
        signer.sign_at(11, &mut signed, 1_600_000_000);

        let mut trailer = Writer::new();
        trailer.write_name(&key_name);
        trailer.write_u16(class::ANY);
        trailer.write_u32(0);
        trailer.write_name(&Name::from_dotted("HMAC-MD5.SIG-ALG.REG.INT."));
        trailer.write_u48(1_600_000_000);
        trailer.write_u16(300);
        trailer.write_u16(0);
        trailer.write_u16(0);
        let mut reference = Hmac::<Md5>::new_from_slice(&secret).unwrap();
        reference.update(&unsigned);
        reference.update(&trailer.into_bytes());
        let expected = reference.finalize().into_bytes().to_vec();

        let decoded = Message::decode(&signed).unwrap();
        match decoded.additionals[0].rdata.as_ref().unwrap() {
            RData::Tsig {
                mac, original_id, ..
            } => {
                assert_eq!(*mac, expected);
                assert_eq!(*original_id, 11);
            }
            other => panic!("expected TSIG rdata, got {:?}", other),
        }
    }
}
