//! Feature transform and K-Means clustering

use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use tracing::debug;

use crate::config::SegmenterConfig;
use crate::error::RfmError;
use crate::rfm::RfmTable;

/// Feature column order used by every matrix in this module
pub const FEATURE_NAMES: [&str; 3] = ["recency", "frequency", "monetary"];

/// Per-column standardization fitted on one run's population.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    /// Population standard deviation (ddof = 0)
    pub std: Array1<f64>,
}

impl StandardScaler {
    /// Fit column statistics, refusing columns that cannot be standardized.
    ///
    /// An empty matrix is reported as insufficient data, not as a degenerate one.
    pub fn fit(data: &Array2<f64>) -> crate::Result<Self> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or(RfmError::InsufficientCustomers {
                customers: 0,
                clusters: 1,
            })?;
        let std = data.std_axis(Axis(0), 0.0);

        for (idx, (&m, &s)) in mean.iter().zip(std.iter()).enumerate() {
            let feature = FEATURE_NAMES.get(idx).copied().unwrap_or("feature");
            if !m.is_finite() || !s.is_finite() {
                return Err(RfmError::DegenerateFeature {
                    feature,
                    reason: "non-finite mean or standard deviation".to_string(),
                });
            }
            // Identical inputs can leave rounding residue instead of an exact zero.
            if s <= 1e-12 * m.abs().max(1.0) {
                return Err(RfmError::DegenerateFeature {
                    feature,
                    reason: "zero variance across customers".to_string(),
                });
            }
        }

        Ok(Self { mean, std })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.mean) / &self.std
    }
}

/// Apply `ln(1 + x)` to every value; inputs must be finite and non-negative.
pub fn log_transform(raw: &Array2<f64>) -> crate::Result<Array2<f64>> {
    for (idx, values) in raw.axis_iter(Axis(1)).enumerate() {
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(RfmError::DegenerateFeature {
                feature: FEATURE_NAMES.get(idx).copied().unwrap_or("feature"),
                reason: "negative or non-finite value before log transform".to_string(),
            });
        }
    }
    Ok(raw.mapv(f64::ln_1p))
}

/// RFM feature matrix ready for clustering
#[derive(Debug, Clone)]
pub struct RfmData {
    /// Log-transformed, standardized features (n_customers, 3)
    pub features: Array2<f64>,
    /// Customer IDs corresponding to each row
    pub customer_ids: Vec<String>,
    /// Scaler fitted on this population
    pub scaler: StandardScaler,
    /// Raw RFM values before any transform
    pub raw_features: Array2<f64>,
}

impl RfmData {
    pub fn from_table(table: &RfmTable) -> crate::Result<Self> {
        let raw: Vec<f64> = table
            .customers
            .iter()
            .flat_map(|customer| customer.features())
            .collect();
        let raw_features = Array2::from_shape_vec((table.len(), FEATURE_NAMES.len()), raw)
            .map_err(|e| RfmError::DegenerateClustering(e.to_string()))?;

        let logged = log_transform(&raw_features)?;
        let scaler = StandardScaler::fit(&logged)?;
        let features = scaler.transform(&logged);

        Ok(Self {
            features,
            customer_ids: table.customers.iter().map(|c| c.customer_id.clone()).collect(),
            scaler,
            raw_features,
        })
    }

    pub fn len(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_ids.is_empty()
    }
}

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    /// Fitted K-Means model from linfa
    pub model: KMeans<f64, L2Dist>,
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments, 0-based
    pub labels: Array1<usize>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        cluster_sizes(&self.labels, self.n_clusters)
    }

    pub fn silhouette(&self, features: &Array2<f64>) -> crate::Result<f64> {
        silhouette_score(features, &self.labels, self.n_clusters)
    }
}

/// Fit K-Means on the standardized features.
///
/// The generator is seeded from the config, so identical input always yields
/// identical labels. Each of the `n_init` initializations uses k-means++ and
/// the run with the lowest inertia is kept.
pub fn fit_kmeans(rfm_data: &RfmData, config: &SegmenterConfig) -> crate::Result<KMeansModel> {
    config.validate()?;

    if rfm_data.len() < config.n_clusters {
        return Err(RfmError::InsufficientCustomers {
            customers: rfm_data.len(),
            clusters: config.n_clusters,
        });
    }

    let rng = Xoshiro256Plus::seed_from_u64(config.seed);
    let dataset = DatasetBase::from(rfm_data.features.clone());

    let model = KMeans::params_with(config.n_clusters, rng, L2Dist)
        .n_runs(config.n_init)
        .max_n_iterations(config.max_iters)
        .tolerance(config.tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(&rfm_data.features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&rfm_data.features, &labels, &centroids);

    debug!(
        clusters = config.n_clusters,
        seed = config.seed,
        n_init = config.n_init,
        inertia,
        "fitted k-means"
    );

    Ok(KMeansModel {
        model,
        n_clusters: config.n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Number of points per cluster label
pub fn cluster_sizes(labels: &Array1<usize>, n_clusters: usize) -> Vec<usize> {
    let mut sizes = vec![0; n_clusters];
    for &label in labels.iter() {
        if label < n_clusters {
            sizes[label] += 1;
        }
    }
    sizes
}

/// Mean of each feature per cluster; empty clusters get `None`.
pub fn cluster_means(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    n_clusters: usize,
) -> Vec<Option<Array1<f64>>> {
    let mut sums = Array2::<f64>::zeros((n_clusters, features.ncols()));
    let sizes = cluster_sizes(labels, n_clusters);

    for (row, &label) in features.outer_iter().zip(labels.iter()) {
        if label < n_clusters {
            let mut target = sums.row_mut(label);
            target += &row;
        }
    }

    sums.outer_iter()
        .zip(sizes)
        .map(|(sum, size)| (size > 0).then(|| &sum / size as f64))
        .collect()
}

/// Mean silhouette coefficient over every point.
///
/// Points in singleton clusters score 0. Fails when fewer than two clusters
/// are populated, since the coefficient is undefined there.
pub fn silhouette_score(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    n_clusters: usize,
) -> crate::Result<f64> {
    if labels.len() != features.nrows() {
        return Err(RfmError::DegenerateClustering(format!(
            "{} labels for {} points",
            labels.len(),
            features.nrows()
        )));
    }
    if let Some(&label) = labels.iter().find(|&&label| label >= n_clusters) {
        return Err(RfmError::DegenerateClustering(format!(
            "label {} outside of {} clusters",
            label, n_clusters
        )));
    }

    let sizes = cluster_sizes(labels, n_clusters);
    let populated = sizes.iter().filter(|&&size| size > 0).count();
    if populated < 2 {
        return Err(RfmError::DegenerateClustering(format!(
            "silhouette needs at least 2 populated clusters, found {}",
            populated
        )));
    }

    let n_samples = features.nrows();
    let mut distance_sums = vec![0.0; n_clusters];
    let mut silhouette_sum = 0.0;

    for i in 0..n_samples {
        let own = labels[i];
        if sizes[own] < 2 {
            continue;
        }

        distance_sums.iter_mut().for_each(|sum| *sum = 0.0);
        let point = features.row(i);
        for j in 0..n_samples {
            if i != j {
                distance_sums[labels[j]] += euclidean_distance(&point, &features.row(j));
            }
        }

        // a(i): mean distance to the rest of its own cluster
        let a_i = distance_sums[own] / (sizes[own] - 1) as f64;
        // b(i): lowest mean distance to any other populated cluster
        let b_i = (0..n_clusters)
            .filter(|&k| k != own && sizes[k] > 0)
            .map(|k| distance_sums[k] / sizes[k] as f64)
            .fold(f64::INFINITY, f64::min);

        let scale = a_i.max(b_i);
        if scale > 0.0 {
            silhouette_sum += (b_i - a_i) / scale;
        }
    }

    Ok(silhouette_sum / n_samples as f64)
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let distance = euclidean_distance(&features.row(i), &centroids.row(cluster));
            inertia += distance * distance;
        }
    }

    inertia
}

fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}
