use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imfind_search_count", "count of the searches", &["kind"]).unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imfind_search_duration",
        "duration of the per-query search in seconds",
        &["kind"]
    )
    .unwrap()
});

static METRIC_REBUILD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imfind_rebuild_duration",
        "duration of the snapshot rebuild in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    )
    .unwrap()
});

static METRIC_INDEXED_IMAGES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("imfind_indexed_images", "number of images in the published snapshot")
        .unwrap()
});

/// 记录一次搜索，`kind` 为 visual、text 或 hybrid
pub fn observe_search(kind: &str, duration: f64) {
    METRIC_SEARCH_COUNT.with_label_values(&[kind]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[kind]).observe(duration);
}

pub fn observe_rebuild(duration: f64) {
    METRIC_REBUILD_DURATION.observe(duration);
}

pub fn set_indexed_images(count: usize) {
    METRIC_INDEXED_IMAGES.set(count as i64);
}
