//! Segmenter: clusters RFM features and names the resulting segments

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::config::SegmenterConfig;
use crate::error::RfmError;
use crate::model::{cluster_means, fit_kmeans, RfmData};
use crate::rfm::{CustomerRfm, RfmTable};

/// Name used for cluster ids the catalog does not know
pub const UNKNOWN_SEGMENT: &str = "Unknown";

pub const SLEEPING_REGULARS: usize = 1;
pub const RISING_STARS: usize = 2;
pub const PRICE_SENSITIVE_ONE_TIMERS: usize = 3;
pub const PREMIUM_LOYALIST: usize = 4;

/// One entry of the static segment catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDefinition {
    pub cluster_id: usize,
    /// Stable key used by downstream storage
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// The fixed cluster id to segment table, ordered by cluster id.
pub const SEGMENT_CATALOG: [SegmentDefinition; 4] = [
    SegmentDefinition {
        cluster_id: SLEEPING_REGULARS,
        slug: "sleeping-regulars",
        name: "Sleeping Regulars",
        description: "Bought repeatedly in the past but have not returned for a long time",
    },
    SegmentDefinition {
        cluster_id: RISING_STARS,
        slug: "rising-stars",
        name: "Rising Stars",
        description: "Recent customers with growing purchase activity",
    },
    SegmentDefinition {
        cluster_id: PRICE_SENSITIVE_ONE_TIMERS,
        slug: "price-sensitive-one-timers",
        name: "Price-Sensitive One-Timers",
        description: "Few, low-value purchases",
    },
    SegmentDefinition {
        cluster_id: PREMIUM_LOYALIST,
        slug: "premium-loyalist",
        name: "Premium Loyalist",
        description: "Recent, frequent and high-spending customers",
    },
];

/// Segment name for a 1-based cluster id.
pub fn label_cluster(cluster_id: usize) -> &'static str {
    SEGMENT_CATALOG
        .iter()
        .find(|segment| segment.cluster_id == cluster_id)
        .map(|segment| segment.name)
        .unwrap_or(UNKNOWN_SEGMENT)
}

/// How K-Means labels become catalog cluster ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LabelingStrategy {
    /// `cluster_id = label + 1`.
    ///
    /// Names follow the label index, not the cluster profile, so they only
    /// keep their meaning while the seed and the customer population stay put.
    #[default]
    ByIndex,
    /// Cluster ids are chosen from each cluster's mean R/F/M so that the
    /// catalog name describes the customers in it.
    Calibrated,
}

/// A customer with its assigned segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedCustomer {
    pub rfm: CustomerRfm,
    /// 1-based cluster id
    pub cluster_id: usize,
    pub segment_name: String,
}

/// Size and mean raw RFM values of one populated segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentProfile {
    pub cluster_id: usize,
    pub segment_name: String,
    pub customers: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Result of one segmentation run.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Same order as the input table
    pub customers: Vec<SegmentedCustomer>,
    /// Mean silhouette coefficient in standardized feature space
    pub silhouette: f64,
    /// Within-cluster sum of squares
    pub inertia: f64,
    /// Centroids in standardized space, row `cluster_id - 1`
    pub centroids: Array2<f64>,
    /// Populated segments ordered by cluster id
    pub profiles: Vec<SegmentProfile>,
    pub labeling: LabelingStrategy,
}

/// Cluster the customer population and attach segment names.
///
/// Features are log-transformed and standardized with statistics from this
/// population only. Fails without producing anything when there are fewer
/// customers than clusters or a feature cannot be standardized.
pub fn segment_customers(table: &RfmTable, config: &SegmenterConfig) -> crate::Result<Segmentation> {
    config.validate()?;

    if table.len() < config.n_clusters {
        return Err(RfmError::InsufficientCustomers {
            customers: table.len(),
            clusters: config.n_clusters,
        });
    }

    let rfm_data = RfmData::from_table(table)?;
    let model = fit_kmeans(&rfm_data, config)?;

    let ids_by_label: Vec<usize> = match config.labeling {
        LabelingStrategy::ByIndex => (1..=config.n_clusters).collect(),
        LabelingStrategy::Calibrated => {
            let means = cluster_means(&rfm_data.features, &model.labels, model.n_clusters);
            calibrate_cluster_ids(&means)?
        }
    };
    debug!(labeling = ?config.labeling, ids = ?ids_by_label, "mapped cluster labels");

    let silhouette = model.silhouette(&rfm_data.features)?;

    let customers: Vec<SegmentedCustomer> = table
        .customers
        .iter()
        .zip(model.labels.iter())
        .map(|(rfm, &label)| {
            let cluster_id = ids_by_label[label];
            SegmentedCustomer {
                rfm: rfm.clone(),
                cluster_id,
                segment_name: label_cluster(cluster_id).to_string(),
            }
        })
        .collect();

    let mut centroids = Array2::zeros(model.centroids.raw_dim());
    for (label, &cluster_id) in ids_by_label.iter().enumerate() {
        centroids.row_mut(cluster_id - 1).assign(&model.centroids.row(label));
    }

    Ok(Segmentation {
        profiles: segment_profiles(&customers, config.n_clusters),
        customers,
        silhouette,
        inertia: model.inertia,
        centroids,
        labeling: config.labeling,
    })
}

/// Choose a catalog cluster id for every K-Means label from cluster means.
///
/// `means` holds the standardized `[recency, frequency, monetary]` mean per
/// label (`None` for an empty cluster). Segments are claimed in order:
/// Premium Loyalist takes the highest `F + M - R`, Price-Sensitive One-Timers
/// the lowest `F + M`, Sleeping Regulars the highest `R`, and Rising Stars what
/// is left. Ties go to the lower label. Returns the id for each label.
pub fn calibrate_cluster_ids(means: &[Option<Array1<f64>>]) -> crate::Result<Vec<usize>> {
    if means.len() != SEGMENT_CATALOG.len() {
        return Err(RfmError::InvalidConfig(format!(
            "calibration expects {} clusters, got {}",
            SEGMENT_CATALOG.len(),
            means.len()
        )));
    }

    let rules: [(usize, fn(&Array1<f64>) -> f64); 3] = [
        (PREMIUM_LOYALIST, |m| m[1] + m[2] - m[0]),
        (PRICE_SENSITIVE_ONE_TIMERS, |m| -(m[1] + m[2])),
        (SLEEPING_REGULARS, |m| m[0]),
    ];

    let mut remaining: Vec<(usize, &Array1<f64>)> = means
        .iter()
        .enumerate()
        .filter_map(|(label, mean)| mean.as_ref().map(|m| (label, m)))
        .collect();
    let mut ids = vec![0; means.len()];

    for (cluster_id, score) in rules {
        let mut best: Option<(usize, f64)> = None;
        for (pos, (_, mean)) in remaining.iter().enumerate() {
            let value = score(mean);
            if best.map_or(true, |(_, top)| value > top) {
                best = Some((pos, value));
            }
        }
        let Some((pos, _)) = best else {
            break;
        };
        let (label, _) = remaining.remove(pos);
        ids[label] = cluster_id;
    }

    let free: Vec<usize> = (1..=means.len()).filter(|id| !ids.contains(id)).collect();
    let leftovers: Vec<usize> = remaining
        .iter()
        .map(|&(label, _)| label)
        .chain((0..means.len()).filter(|&label| means[label].is_none()))
        .collect();
    for (label, id) in leftovers.into_iter().zip(free) {
        ids[label] = id;
    }

    Ok(ids)
}

fn segment_profiles(customers: &[SegmentedCustomer], n_clusters: usize) -> Vec<SegmentProfile> {
    (1..=n_clusters)
        .filter_map(|cluster_id| {
            let members: Vec<&CustomerRfm> = customers
                .iter()
                .filter(|c| c.cluster_id == cluster_id)
                .map(|c| &c.rfm)
                .collect();
            if members.is_empty() {
                return None;
            }
            let count = members.len() as f64;
            Some(SegmentProfile {
                cluster_id,
                segment_name: label_cluster(cluster_id).to_string(),
                customers: members.len(),
                mean_recency: members.iter().map(|c| c.recency as f64).sum::<f64>() / count,
                mean_frequency: members.iter().map(|c| c.frequency as f64).sum::<f64>() / count,
                mean_monetary: members.iter().map(|c| c.monetary).sum::<f64>() / count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;

    fn customer(id: &str, recency: i64, frequency: u32, monetary: f64) -> CustomerRfm {
        let snapshot = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        CustomerRfm {
            customer_id: id.to_string(),
            last_purchase: snapshot - chrono::Duration::days(recency),
            recency,
            frequency,
            monetary,
        }
    }

    /// Three customers for each of four distinct behaviors.
    fn archetype_table() -> RfmTable {
        let mut customers = vec![
            customer("P1", 2, 22, 5200.0),
            customer("P2", 3, 25, 5900.0),
            customer("P3", 4, 20, 5500.0),
            customer("S1", 300, 7, 180.0),
            customer("S2", 320, 6, 150.0),
            customer("S3", 330, 8, 200.0),
            customer("O1", 120, 1, 25.0),
            customer("O2", 140, 1, 20.0),
            customer("O3", 150, 1, 30.0),
            customer("R1", 6, 3, 900.0),
            customer("R2", 8, 4, 800.0),
            customer("R3", 10, 3, 1000.0),
        ];
        customers.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));
        RfmTable {
            snapshot_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(0, 0, 0),
            customers,
        }
    }

    fn segment_of<'a>(segmentation: &'a Segmentation, id: &str) -> &'a SegmentedCustomer {
        segmentation
            .customers
            .iter()
            .find(|c| c.rfm.customer_id == id)
            .unwrap()
    }

    #[test]
    fn test_label_cluster() {
        assert_eq!(label_cluster(1), "Sleeping Regulars");
        assert_eq!(label_cluster(2), "Rising Stars");
        assert_eq!(label_cluster(3), "Price-Sensitive One-Timers");
        assert_eq!(label_cluster(4), "Premium Loyalist");
        assert_eq!(label_cluster(0), UNKNOWN_SEGMENT);
        assert_eq!(label_cluster(5), UNKNOWN_SEGMENT);
    }

    #[test]
    fn test_catalog_ids_are_contiguous() {
        for (idx, segment) in SEGMENT_CATALOG.iter().enumerate() {
            assert_eq!(segment.cluster_id, idx + 1);
        }
    }

    #[test]
    fn test_by_index_labels_are_valid_and_deterministic() {
        let table = archetype_table();
        let config = SegmenterConfig::default();

        let first = segment_customers(&table, &config).unwrap();
        let second = segment_customers(&table, &config).unwrap();

        assert_eq!(first.customers, second.customers);
        assert_eq!(first.customers.len(), 12);
        for segmented in &first.customers {
            assert!((1..=4).contains(&segmented.cluster_id));
            assert_ne!(segmented.segment_name, UNKNOWN_SEGMENT);
            assert_eq!(segmented.segment_name, label_cluster(segmented.cluster_id));
        }
        assert!(first.silhouette > 0.5 && first.silhouette <= 1.0);
    }

    #[test]
    fn test_calibrated_labels_follow_profiles() {
        let config = SegmenterConfig {
            labeling: LabelingStrategy::Calibrated,
            ..SegmenterConfig::default()
        };
        let segmentation = segment_customers(&archetype_table(), &config).unwrap();

        for (prefix, expected) in [
            ("P", "Premium Loyalist"),
            ("S", "Sleeping Regulars"),
            ("O", "Price-Sensitive One-Timers"),
            ("R", "Rising Stars"),
        ] {
            for n in 1..=3 {
                let id = format!("{}{}", prefix, n);
                assert_eq!(segment_of(&segmentation, &id).segment_name, expected, "{}", id);
            }
        }

        assert_eq!(segmentation.profiles.len(), 4);
        let premium = &segmentation.profiles[PREMIUM_LOYALIST - 1];
        assert_eq!(premium.customers, 3);
        assert!((premium.mean_frequency - 67.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_profiles_cover_population() {
        let segmentation = segment_customers(&archetype_table(), &SegmenterConfig::default()).unwrap();
        let total: usize = segmentation.profiles.iter().map(|p| p.customers).sum();
        assert_eq!(total, 12);
        assert_eq!(segmentation.centroids.shape(), &[4, 3]);
    }

    #[test]
    fn test_too_few_customers() {
        let mut table = archetype_table();
        table.customers.truncate(3);

        let err = segment_customers(&table, &SegmenterConfig::default()).unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn test_zero_variance_feature_is_fatal() {
        let customers = (0..6)
            .map(|i| customer(&format!("C{}", i), 10 * i as i64 + 1, 1, 10.0 + i as f64))
            .collect();
        let table = RfmTable {
            snapshot_date: None,
            customers,
        };

        match segment_customers(&table, &SegmenterConfig::default()) {
            Err(RfmError::DegenerateFeature { feature, .. }) => assert_eq!(feature, "frequency"),
            other => panic!("expected DegenerateFeature, got {:?}", other),
        }
    }

    #[test]
    fn test_calibrate_cluster_ids() {
        let means = vec![
            Some(array![-0.8, -0.4, 0.4]),  // recent, modest
            Some(array![1.2, 0.2, -0.4]),   // long gone
            Some(array![-1.2, 1.4, 1.3]),   // best customers
            Some(array![0.8, -1.2, -1.3]),  // bought once, little
        ];
        let ids = calibrate_cluster_ids(&means).unwrap();
        assert_eq!(
            ids,
            vec![RISING_STARS, SLEEPING_REGULARS, PREMIUM_LOYALIST, PRICE_SENSITIVE_ONE_TIMERS]
        );
    }

    #[test]
    fn test_calibrate_with_empty_cluster() {
        let means = vec![
            None,
            Some(array![1.0, -1.0, -1.0]),
            Some(array![-1.0, 1.0, 1.0]),
            Some(array![0.5, 0.0, 0.2]),
        ];
        let ids = calibrate_cluster_ids(&means).unwrap();

        assert_eq!(ids[2], PREMIUM_LOYALIST);
        assert_eq!(ids[1], PRICE_SENSITIVE_ONE_TIMERS);
        assert_eq!(ids[3], SLEEPING_REGULARS);
        assert_eq!(ids[0], RISING_STARS);
    }

    #[test]
    fn test_calibrate_rejects_wrong_cluster_count() {
        let means = vec![Some(array![0.0, 0.0, 0.0]); 3];
        assert!(calibrate_cluster_ids(&means).is_err());
    }
}
