//! Fold step: classify each record and count it exactly once

use tracing::warn;

use crate::aggregate::classifier::{is_on_campus, Classifier};
use crate::aggregate::models::AggregateState;
use crate::parser::LogRecord;
use crate::resolver::Resolver;

/// Virtual host and site key used when a record has none
pub const DEFAULT_KEY: &str = "_default";

/// Fold one parsed record into `state`.
///
/// Every record counts toward the grand totals. Records from an ignored
/// network stop there. The rest are split on/off campus; hostnames outside
/// the institutional domain stop after the split. Everything else, unless
/// its virtual host is ignored, is counted in the host's network bucket
/// and, when the site is not ignored, in its site bucket.
///
/// Counters saturate instead of overflowing, so no byte size can abort a run.
pub fn fold<R: Resolver>(classifier: &Classifier<R>, state: &mut AggregateState, record: &LogRecord) {
    let network = classifier.classify_network(&record.ip);

    let bytes = record.bytes().unwrap_or_else(|e| {
        warn!(client = %record.ip, error = %e, "Failed to decode byte size, counting 0 bytes");
        0
    });

    state.total = state.total.saturating_add(1);
    state.total_bytes = state.total_bytes.saturating_add(bytes);

    if network.ignore {
        return;
    }

    if is_on_campus(network.addr) {
        state.on_campus = state.on_campus.saturating_add(1);
        state.on_campus_bytes = state.on_campus_bytes.saturating_add(bytes);
    } else {
        state.off_campus = state.off_campus.saturating_add(1);
        state.off_campus_bytes = state.off_campus_bytes.saturating_add(bytes);
    }

    if network.untracked {
        return;
    }

    let policy = classifier.policy();

    let host = record.virtual_host.as_deref().unwrap_or(DEFAULT_KEY);
    let host_disposition = policy.resolve_virtual_host(host);
    if host_disposition.is_ignored() {
        return;
    }

    let stats = state.virtual_hosts.entry(host.to_string()).or_default();

    // A summarized host drops detail whatever the network asks for
    let detail = host_disposition.tracks_detail();
    stats
        .networks
        .entry(network.label.clone())
        .or_default()
        .record(
            &network.client,
            &record.base_uri,
            bytes,
            network.track_clients && detail,
            network.track_paths && detail,
        );

    let site = record.top_level.as_deref().unwrap_or(DEFAULT_KEY);
    let site_disposition = policy.resolve_site(site);
    if site_disposition.is_ignored() {
        return;
    }

    let track = site_disposition.tracks_detail();
    stats
        .sites
        .entry(site.to_string())
        .or_default()
        .record(&network.client, &record.base_uri, bytes, track, track);
}

/// Owns the classifier and the single aggregate state of a run
pub struct TrafficAggregator<R> {
    classifier: Classifier<R>,
    state: AggregateState,
}

impl<R: Resolver> TrafficAggregator<R> {
    pub fn new(classifier: Classifier<R>) -> Self {
        Self {
            classifier,
            state: AggregateState::new(),
        }
    }

    /// Count one parsed record
    pub fn record(&mut self, record: &LogRecord) {
        fold(&self.classifier, &mut self.state, record);
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn into_state(self) -> AggregateState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::models::TOTAL_KEY;
    use crate::parser::parse_line;
    use crate::policy::Policy;
    use crate::resolver::NoResolver;

    fn line(ip: &str, path: &str, size: &str, vhost: Option<&str>) -> String {
        let mut line = format!(
            r#"{ip} - - [01/Sep/2017:00:00:08 -0400] "GET {path} HTTP/1.1" 200 {size} 0.007192 0.000000 0.000000 "-" "curl/7.58.0" 10673 + WajbSArxHDYAACmxCSUAAAVW 128.197.26.35 off:http"#
        );
        if let Some(vhost) = vhost {
            line.push_str(&format!(" wwwv.bu.edu {vhost}"));
        }
        line
    }

    fn aggregator(policy: &str) -> TrafficAggregator<NoResolver> {
        let policy = Policy::from_json_str(policy).unwrap();
        TrafficAggregator::new(Classifier::new(policy, NoResolver))
    }

    fn feed(aggregator: &mut TrafficAggregator<NoResolver>, line: &str) {
        let record = parse_line(1, line).unwrap();
        aggregator.record(&record);
    }

    const TEN_NET: &str = r#"[{ "name": "10net", "net": "10.0.0.0/8", "track": "hosts,uri" }]"#;

    #[test]
    fn test_tracked_network_bucket() {
        let mut agg = aggregator(TEN_NET);
        feed(&mut agg, &line("10.241.26.100", "/htbin/x", "1403", None));

        let state = agg.state();
        assert_eq!(state.total, 1);
        assert_eq!(state.total_bytes, 1403);
        assert_eq!(state.on_campus, 1);

        let bucket = &state.virtual_hosts[DEFAULT_KEY].networks["10net"];
        assert_eq!(bucket.requests, 1);
        assert_eq!(bucket.bytes, 1403);
        assert_eq!(bucket.clients["10.241.26.100"], 1);
        assert_eq!(bucket.paths["/htbin/x"], 1);
        assert_eq!(bucket.paths[TOTAL_KEY], 1);

        // Unlisted sites are ignored
        assert!(state.virtual_hosts[DEFAULT_KEY].sites.is_empty());
    }

    #[test]
    fn test_tracked_site_bucket() {
        let mut agg = aggregator(
            r#"[
                { "name": "10net", "net": "10.0.0.0/8", "track": "hosts,uri" },
                { "site": "htbin", "status": "track" }
            ]"#,
        );
        feed(&mut agg, &line("10.241.26.100", "/htbin/x", "1403", None));

        let site = &agg.state().virtual_hosts[DEFAULT_KEY].sites["htbin"];
        assert_eq!(site.requests, 1);
        assert_eq!(site.clients["10.241.26.100"], 1);
        assert_eq!(site.paths["/htbin/x"], 1);
    }

    #[test]
    fn test_summarized_site_keeps_no_detail() {
        let mut agg = aggregator(r#"[{ "site": "met", "status": "summarize" }]"#);
        feed(&mut agg, &line("67.249.231.2", "/met/a", "10", None));

        let site = &agg.state().virtual_hosts[DEFAULT_KEY].sites["met"];
        assert_eq!(site.requests, 1);
        assert!(site.clients.is_empty());
        assert_eq!(site.unique_paths(), 0);
    }

    #[test]
    fn test_ignored_network_touches_totals_only() {
        let mut agg = aggregator(
            r#"[{ "name": "monitor", "net": "10.0.0.0/8", "track": "hosts,uri", "ignore": "" }]"#,
        );
        feed(&mut agg, &line("10.241.26.100", "/htbin/x", "1403", None));

        let state = agg.state();
        assert_eq!(state.total, 1);
        assert_eq!(state.total_bytes, 1403);
        assert_eq!(state.on_campus, 0);
        assert_eq!(state.off_campus, 0);
        assert_eq!(state.ignored(), 1);
        assert!(state.virtual_hosts.is_empty());
    }

    #[test]
    fn test_summarized_virtual_host_drops_detail() {
        let mut agg = aggregator(
            r#"[
                { "name": "10net", "net": "10.0.0.0/8", "track": "hosts,uri" },
                { "virtual": "blogs.bu.edu", "status": "summarize" }
            ]"#,
        );
        feed(&mut agg, &line("10.1.1.1", "/a", "5", Some("blogs.bu.edu")));

        let bucket = &agg.state().virtual_hosts["blogs.bu.edu"].networks["10net"];
        assert_eq!(bucket.requests, 1);
        assert!(bucket.clients.is_empty());
        assert_eq!(bucket.paths.len(), 1);
        assert!(!bucket.track_clients);
    }

    #[test]
    fn test_ignored_virtual_host_counts_split_only() {
        let mut agg = aggregator(r#"[{ "virtual": "old.bu.edu", "status": "ignore" }]"#);
        feed(&mut agg, &line("67.249.231.2", "/a", "5", Some("old.bu.edu")));

        let state = agg.state();
        assert_eq!(state.off_campus, 1);
        assert!(state.virtual_hosts.is_empty());
    }

    #[test]
    fn test_missing_virtual_host_uses_default() {
        let mut agg = aggregator(TEN_NET);
        feed(&mut agg, &line("67.249.231.2", "/a", "5", None));
        feed(&mut agg, &line("67.249.231.2", "/a", "5", Some("blogs.bu.edu")));

        let state = agg.state();
        assert_eq!(state.virtual_hosts.len(), 2);
        let bucket = &state.virtual_hosts[DEFAULT_KEY].networks["default"];
        assert_eq!(bucket.requests, 1);
        assert!(bucket.clients.is_empty());
    }

    #[test]
    fn test_root_path_uses_default_site() {
        let mut agg = aggregator(r#"[{ "site": "_default", "status": "track" }]"#);
        feed(&mut agg, &line("67.249.231.2", "/", "5", None));

        assert_eq!(agg.state().virtual_hosts[DEFAULT_KEY].sites[DEFAULT_KEY].requests, 1);
    }

    #[test]
    fn test_bad_size_counts_zero_bytes() {
        let mut agg = aggregator(TEN_NET);
        feed(&mut agg, &line("10.0.0.1", "/a", "-", None));
        feed(&mut agg, &line("10.0.0.1", "/a", "lots", None));

        let state = agg.state();
        assert_eq!(state.total, 2);
        assert_eq!(state.total_bytes, 0);
        assert_eq!(state.virtual_hosts[DEFAULT_KEY].networks["10net"].requests, 2);
    }

    #[test]
    fn test_unresolved_hostname_is_still_counted() {
        let mut agg = aggregator(TEN_NET);
        feed(&mut agg, &line("gone.bu.edu", "/a", "5", None));
        feed(&mut agg, &line("crawler.example.com", "/a", "5", None));

        let state = agg.state();
        assert_eq!(state.total, 2);
        assert_eq!(state.off_campus, 2);
        assert_eq!(state.off_campus_bytes, 10);
        assert_eq!(state.ignored(), 0);

        let networks = &state.virtual_hosts[DEFAULT_KEY].networks;
        assert_eq!(networks["error"].clients["unknownDNS"], 1);
        assert_eq!(networks["error"].requests, 1);
        assert!(!networks.contains_key("outsideBUDNS"));
    }

    #[test]
    fn test_outside_hostname_creates_no_virtual_host() {
        let mut agg = aggregator(r#"[{ "site": "a", "status": "track" }]"#);
        feed(&mut agg, &line("crawler.example.com", "/a/b", "5", Some("blogs.bu.edu")));

        let state = agg.state();
        assert_eq!(state.total, 1);
        assert_eq!(state.off_campus, 1);
        assert!(state.virtual_hosts.is_empty());
    }

    #[test]
    fn test_byte_counters_saturate() {
        let mut agg = aggregator(TEN_NET);
        feed(&mut agg, &line("10.0.0.1", "/a", "9223372036854775807", None));
        feed(&mut agg, &line("10.0.0.1", "/a", "1", None));

        let state = agg.state();
        assert_eq!(state.total, 2);
        assert_eq!(state.total_bytes, i64::MAX);
        assert_eq!(state.on_campus_bytes, i64::MAX);
        assert_eq!(state.ignored_bytes(), 0);

        let bucket = &state.virtual_hosts[DEFAULT_KEY].networks["10net"];
        assert_eq!(bucket.requests, 2);
        assert_eq!(bucket.bytes, i64::MAX);
    }

    #[test]
    fn test_totals_invariant() {
        let mut agg = aggregator(
            r#"[
                { "name": "lb", "net": "128.197.26.0/24", "ignore": "yes" },
                { "name": "10net", "net": "10.0.0.0/8", "track": "hosts" }
            ]"#,
        );
        for ip in ["10.0.0.1", "128.197.26.4", "67.249.231.2", "168.122.3.3", "x.example.org"] {
            feed(&mut agg, &line(ip, "/a", "100", None));
        }

        let state = agg.state();
        assert_eq!(state.total, 5);
        assert_eq!(state.on_campus, 2);
        assert_eq!(state.off_campus, 2);
        assert_eq!(state.ignored(), 1);
        assert_eq!(
            state.total_bytes,
            state.on_campus_bytes + state.off_campus_bytes + state.ignored_bytes()
        );
    }
}
