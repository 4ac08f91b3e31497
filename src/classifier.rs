//! C10: the auxiliary heuristic protocol classifier. This is a ranked guess,
//! not a dissector — used when no registered dissector's `probe` claims a
//! window, or to cross-check one that did.

use std::collections::HashMap;

use crate::window::ByteWindow;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub protocol_name: String,
    pub confidence: f64,
    pub method: ClassificationMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationMethod {
    PortBased,
    PatternMatching,
    NaiveBayes,
    DgaDetection,
}

/// Confidence threshold and the port/pattern tables the classifier consults.
/// Conceptually this crate's equivalent of a config struct: no file I/O, just
/// a small value type the caller constructs once and passes by reference.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub confidence_threshold: f64,
    pub dga_detection_enabled: bool,
    pub port_map: HashMap<u16, String>,
    pub patterns: HashMap<String, Vec<Vec<u8>>>,
}

impl Default for ClassifierConfig {
    fn default() -> ClassifierConfig {
        let mut port_map = HashMap::new();
        port_map.insert(80, "HTTP".to_string());
        port_map.insert(443, "HTTPS".to_string());
        port_map.insert(22, "SSH".to_string());
        port_map.insert(53, "DNS".to_string());
        port_map.insert(21, "FTP".to_string());
        port_map.insert(25, "SMTP".to_string());
        port_map.insert(110, "POP3".to_string());
        port_map.insert(143, "IMAP".to_string());
        port_map.insert(993, "IMAPS".to_string());
        port_map.insert(995, "POP3S".to_string());
        port_map.insert(1883, "MQTT".to_string());
        port_map.insert(3868, "Diameter".to_string());
        port_map.insert(1812, "RADIUS".to_string());

        let mut patterns = HashMap::new();
        patterns.insert(
            "HTTP".to_string(),
            vec![b"GET ".to_vec(), b"POST ".to_vec(), b"PUT ".to_vec(), b"HTTP/1.1".to_vec()],
        );
        patterns.insert("TLS".to_string(), vec![vec![0x16, 0x03], vec![0x14, 0x03], vec![0x17, 0x03]]);
        patterns.insert("SSH".to_string(), vec![b"SSH-2.0".to_vec(), b"SSH-1.99".to_vec()]);
        patterns.insert("MQTT".to_string(), vec![vec![0x10], vec![0x20], vec![0x30]]);

        ClassifierConfig {
            confidence_threshold: 0.7,
            dga_detection_enabled: true,
            port_map,
            patterns,
        }
    }
}

/// Running per-protocol feature statistics, updated online as ground-truth
/// labels become available. Held by the caller and passed to
/// [`Classifier::classify`]; kept separate from [`ClassifierConfig`] since it
/// mutates while the config is read-mostly.
#[derive(Debug, Clone, Default)]
pub struct ProtocolStats {
    feature_means: Vec<f64>,
    sample_count: u64,
}

/// Shannon entropy of the byte distribution, base 2.
fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn ascii_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let printable = data.iter().filter(|&&b| (32..=126).contains(&b)).count();
    printable as f64 / data.len() as f64
}

/// The five-feature vector the naive-Bayes classifier scores against its
/// running per-protocol means: packet size, src port, dst port, entropy,
/// ASCII ratio.
fn extract_features(data: &[u8], src_port: u16, dst_port: u16) -> [f64; 5] {
    [
        data.len() as f64,
        src_port as f64,
        dst_port as f64,
        shannon_entropy(data),
        ascii_ratio(data),
    ]
}

/// Fraction of alphanumeric characters that are digits — domains generated by
/// a DGA mix digits into what looks like a hostname far more than real ones do.
fn random_char_ratio(data: &[u8]) -> f64 {
    let alnum = data.iter().filter(|&&b| b.is_ascii_alphanumeric()).count();
    if alnum == 0 {
        return 0.0;
    }
    let digits = data.iter().filter(|&&b| b.is_ascii_digit()).count();
    digits as f64 / alnum as f64
}

/// Flags short, high-entropy payloads that look like algorithmically
/// generated domain names rather than ordinary protocol traffic.
pub fn is_suspicious_domain(data: &[u8]) -> bool {
    if data.len() < 5 || data.len() > 50 {
        return false;
    }
    if shannon_entropy(data) > 4.5 {
        return true;
    }
    random_char_ratio(data) > 0.3
}

fn classify_by_port(config: &ClassifierConfig, src_port: u16, dst_port: u16) -> ClassificationResult {
    if let Some(name) = config.port_map.get(&dst_port) {
        return ClassificationResult {
            protocol_name: name.clone(),
            confidence: 0.8,
            method: ClassificationMethod::PortBased,
        };
    }
    if let Some(name) = config.port_map.get(&src_port) {
        return ClassificationResult {
            protocol_name: name.clone(),
            confidence: 0.7,
            method: ClassificationMethod::PortBased,
        };
    }
    ClassificationResult {
        protocol_name: "UNKNOWN".to_string(),
        confidence: 0.1,
        method: ClassificationMethod::PortBased,
    }
}

fn classify_by_patterns(config: &ClassifierConfig, data: &[u8]) -> ClassificationResult {
    let window = &data[..data.len().min(256)];
    for (protocol, patterns) in &config.patterns {
        for pattern in patterns {
            if window.windows(pattern.len().max(1)).any(|w| w == pattern.as_slice()) {
                return ClassificationResult {
                    protocol_name: protocol.clone(),
                    confidence: 0.9,
                    method: ClassificationMethod::PatternMatching,
                };
            }
        }
    }
    ClassificationResult {
        protocol_name: "UNKNOWN".to_string(),
        confidence: 0.1,
        method: ClassificationMethod::PatternMatching,
    }
}

fn classify_naive_bayes(stats: &HashMap<String, ProtocolStats>, features: &[f64; 5]) -> ClassificationResult {
    let mut best_score = f64::NEG_INFINITY;
    let mut best_protocol: Option<&str> = None;

    for (protocol, protocol_stats) in stats {
        if protocol_stats.feature_means.is_empty() || protocol_stats.sample_count == 0 {
            continue;
        }
        let mut score = 0.0;
        for (f, mean) in features.iter().zip(protocol_stats.feature_means.iter()) {
            let diff = f - mean;
            score -= diff * diff;
        }
        if score > best_score {
            best_score = score;
            best_protocol = Some(protocol);
        }
    }

    match best_protocol {
        Some(protocol) => ClassificationResult {
            protocol_name: protocol.to_string(),
            confidence: (best_score / features.len() as f64).exp() * 0.8,
            method: ClassificationMethod::NaiveBayes,
        },
        None => ClassificationResult {
            protocol_name: "UNKNOWN".to_string(),
            confidence: 0.1,
            method: ClassificationMethod::NaiveBayes,
        },
    }
}

/// Combines port-, pattern-, and naive-Bayes classification, plus a DGA
/// suspicion check, keeping only results at or above the configured
/// confidence threshold. Per-protocol statistics are owned by the caller
/// (see spec's concurrency note: serialize [`update_online_classifier`]
/// calls across threads) so the classifier itself holds no mutable state.
pub struct Classifier<'a> {
    config: &'a ClassifierConfig,
}

impl<'a> Classifier<'a> {
    pub fn new(config: &'a ClassifierConfig) -> Classifier<'a> {
        Classifier { config }
    }

    pub fn classify(
        &self,
        window: &ByteWindow,
        src_port: u16,
        dst_port: u16,
        stats: &HashMap<String, ProtocolStats>,
    ) -> Vec<ClassificationResult> {
        let data = window.as_slice();
        let mut results = Vec::new();

        let features = extract_features(data, src_port, dst_port);
        let nb = classify_naive_bayes(stats, &features);
        if nb.confidence >= self.config.confidence_threshold {
            results.push(nb);
        }

        let port = classify_by_port(self.config, src_port, dst_port);
        if port.confidence >= self.config.confidence_threshold {
            results.push(port);
        }

        let pattern = classify_by_patterns(self.config, data);
        if pattern.confidence >= self.config.confidence_threshold {
            results.push(pattern);
        }

        if self.config.dga_detection_enabled {
            let sample = &data[..data.len().min(128)];
            if is_suspicious_domain(sample) {
                results.push(ClassificationResult {
                    protocol_name: "DGA_DETECTED".to_string(),
                    confidence: 0.85,
                    method: ClassificationMethod::DgaDetection,
                });
            }
        }

        results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}

/// Online update of the running feature-mean statistics for `label`,
/// incorporating one more observed `features` sample.
pub fn update_online_classifier(stats: &mut HashMap<String, ProtocolStats>, features: &[f64], label: &str) {
    let entry = stats.entry(label.to_string()).or_default();
    if entry.feature_means.is_empty() {
        entry.feature_means = features.to_vec();
        entry.sample_count = 1;
    } else {
        for (mean, &f) in entry.feature_means.iter_mut().zip(features.iter()) {
            *mean = (*mean * entry.sample_count as f64 + f) / (entry.sample_count as f64 + 1.0);
        }
        entry.sample_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mapping_gives_dst_port_priority() {
        let config = ClassifierConfig::default();
        let result = classify_by_port(&config, 50000, 80);
        assert_eq!(result.protocol_name, "HTTP");
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn pattern_match_recognises_http_get() {
        let config = ClassifierConfig::default();
        let result = classify_by_patterns(&config, b"GET /index.html HTTP/1.1\r\n");
        assert_eq!(result.protocol_name, "HTTP");
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn full_classify_ranks_by_confidence() {
        let config = ClassifierConfig::default();
        let classifier = Classifier::new(&config);
        let stats = HashMap::new();
        let data = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let window = ByteWindow::new(data);
        let results = classifier.classify(&window, 54321, 80, &stats);
        assert!(!results.is_empty());
        assert_eq!(results[0].protocol_name, "HTTP");
        for pair in results.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn online_update_converges_to_mean() {
        let mut stats = HashMap::new();
        update_online_classifier(&mut stats, &[10.0, 20.0], "TEST");
        update_online_classifier(&mut stats, &[20.0, 40.0], "TEST");
        let entry = &stats["TEST"];
        assert_eq!(entry.sample_count, 2);
        assert_eq!(entry.feature_means, vec![15.0, 30.0]);
    }

    #[test]
    fn entropy_of_uniform_bytes_is_high() {
        let data: Vec<u8> = (0..=255).collect();
        assert!(shannon_entropy(&data) > 7.9);
    }

    #[test]
    fn entropy_of_constant_bytes_is_zero() {
        let data = vec![0x41; 100];
        assert_eq!(shannon_entropy(&data), 0.0);
    }
}
