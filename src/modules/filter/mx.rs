// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::Resolver;
use tracing::warn;

use crate::modules::error::RelayResult;
use crate::modules::filter::{FilterOutcome, FilterTarget};

type DnsResolver = Resolver<TokioConnectionProvider>;

/// One round-robin-eligible nameserver, with its own timeout and a
/// disabled flag for the remainder of a single lookup once it has proven
/// unreliable (malformed / SERVFAIL-class response).
struct Nameserver {
    addr: SocketAddr,
    disabled: bool,
}

/// Resolves an envelope's forward target to a literal `ip:port` by MX,
/// optional single CNAME hop, then A/AAAA. See the design's §4.3 item 5.
pub struct MxFilter {
    nameservers: Vec<SocketAddr>,
    default_port: u16,
    restart_timeout: Duration,
}

impl MxFilter {
    pub fn new(nameservers: Vec<SocketAddr>, default_port: u16, restart_timeout: Duration) -> Self {
        Self {
            nameservers,
            default_port,
            restart_timeout,
        }
    }

    pub fn id(&self) -> String {
        "mx".to_string()
    }

    pub async fn run(&self, target: &mut dyn FilterTarget, per_nameserver_timeout: Duration) -> RelayResult<FilterOutcome> {
        let domain = {
            let envelope = target.envelope();
            let to = envelope
                .forward_to
                .clone()
                .unwrap_or_default();
            match to.rsplit_once('@') {
                Some((_, domain)) => domain.to_string(),
                None => to,
            }
        };

        if domain.is_empty() {
            return Ok(FilterOutcome::fail(
                "550 no forward address",
                Some("550".to_string()),
                "envelope has no forward_to domain to resolve",
            ));
        }

        match self.resolve(&domain, per_nameserver_timeout).await {
            Ok(address) => {
                target.envelope_mut().forward_to_address = Some(address);
                Ok(FilterOutcome::ok())
            }
            Err(reason) => Ok(FilterOutcome::fail(
                "450 mx lookup failed",
                Some("450".to_string()),
                reason,
            )),
        }
    }

    /// Round-robins across the configured nameservers (or the system
    /// resolver if none are configured), giving each a fresh attempt per
    /// round until one succeeds, an NXDOMAIN is authoritative (fatal,
    /// stops immediately), or every nameserver has been marked disabled.
    /// Sleeps `restart_timeout` between rounds once a full round has been
    /// exhausted without a usable answer.
    async fn resolve(&self, domain: &str, per_ns_timeout: Duration) -> Result<String, String> {
        if self.nameservers.is_empty() {
            let resolver = system_resolver(per_ns_timeout);
            return resolve_via(&resolver, domain, self.default_port).await;
        }

        let mut servers: Vec<Nameserver> = self
            .nameservers
            .iter()
            .map(|addr| Nameserver { addr: *addr, disabled: false })
            .collect();

        loop {
            let mut last_error = String::from("no nameservers available");
            let mut any_enabled = false;

            for ns in servers.iter_mut() {
                if ns.disabled {
                    continue;
                }
                any_enabled = true;
                let resolver = nameserver_resolver(ns.addr, per_ns_timeout);
                match resolve_via(&resolver, domain, self.default_port).await {
                    Ok(address) => return Ok(address),
                    Err(e) if e == "nxdomain" => return Err(format!("{domain}: no such domain")),
                    Err(e) => {
                        if e == "malformed" || e == "servfail" {
                            ns.disabled = true;
                        }
                        warn!(nameserver = %ns.addr, domain, "mx lookup attempt failed: {e}");
                        last_error = e;
                    }
                }
            }

            if !any_enabled {
                return Err(last_error);
            }
            tokio::time::sleep(self.restart_timeout).await;
        }
    }
}

fn system_resolver(timeout: Duration) -> DnsResolver {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    Resolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
        .with_options(opts)
        .build()
}

fn nameserver_resolver(addr: SocketAddr, timeout: Duration) -> DnsResolver {
    let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
    let config = ResolverConfig::from_parts(None, vec![], group);
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    Resolver::builder_with_config(config, TokioConnectionProvider::default())
        .with_options(opts)
        .build()
}

async fn resolve_via(resolver: &DnsResolver, domain: &str, default_port: u16) -> Result<String, String> {
    match resolver.mx_lookup(domain).await {
        Ok(mx) => {
            let Some(record) = mx.iter().min_by_key(|r| r.preference()) else {
                return resolve_address(resolver, domain, default_port).await;
            };
            let exchange = record.exchange().to_utf8();
            let target = follow_cname(resolver, &exchange).await?;
            resolve_address(resolver, &target, default_port).await
        }
        Err(e) if is_no_records(&e) => resolve_address(resolver, domain, default_port).await,
        Err(e) => Err(classify_error(&e)),
    }
}

async fn follow_cname(resolver: &DnsResolver, name: &str) -> Result<String, String> {
    match resolver.lookup(name, RecordType::CNAME).await {
        Ok(answer) => match answer.iter().next() {
            Some(rdata) => Ok(rdata
                .as_cname()
                .map(|c| c.0.to_utf8())
                .unwrap_or_else(|| name.to_string())),
            None => Ok(name.to_string()),
        },
        Err(_) => Ok(name.to_string()),
    }
}

async fn resolve_address(resolver: &DnsResolver, name: &str, default_port: u16) -> Result<String, String> {
    match resolver.lookup_ip(name).await {
        Ok(answer) => {
            let ip: IpAddr = answer.iter().next().ok_or_else(|| "no address record".to_string())?;
            Ok(SocketAddr::new(ip, default_port).to_string())
        }
        Err(e) if is_no_records(&e) => Err("no address record".to_string()),
        Err(e) => Err(classify_error(&e)),
    }
}

/// Distinguishes "domain exists but this record type is absent" (fall
/// through to the next lookup stage) from a transport-level failure.
/// Matched on the error's rendered text rather than its `kind()` variants:
/// those vary across hickory-resolver point releases and a plain string
/// check is the stable surface here.
fn is_no_records(e: &hickory_resolver::ResolveError) -> bool {
    e.to_string().to_lowercase().contains("no records found")
}

fn classify_error(e: &hickory_resolver::ResolveError) -> String {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("nxdomain") || lower.contains("no such domain") {
        "nxdomain".to_string()
    } else if lower.contains("servfail") {
        "servfail".to_string()
    } else if lower.contains("parse") || lower.contains("malformed") {
        "malformed".to_string()
    } else {
        text
    }
}
