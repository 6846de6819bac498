use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_IMAGE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("im_search_image_count", "count of the image to search", &["kind"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_search_duration",
        "duration of the per-image search in seconds",
        &["kind"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_search_max_score",
        "max score of the per-image search",
        &["kind"],
        (0..=20).map(|x| x as f64 / 20.).collect()
    )
    .unwrap()
});

static METRIC_CORPUS_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("im_corpus_size", "number of images in the loaded cache").unwrap()
});

/// 增加搜索次数
pub fn inc_image_count(kind: &str) {
    METRIC_SEARCH_IMAGE_COUNT.with_label_values(&[kind]).inc();
}

pub fn inc_search_duration(kind: &str, duration: f32) {
    METRIC_SEARCH_DURATION.with_label_values(&[kind]).observe(duration as f64);
}

/// 记录单次搜索的最高相似度，用于观察查询是否命中图片库
pub fn inc_search_max_score(kind: &str, score: f32) {
    METRIC_SEARCH_MAX_SCORE.with_label_values(&[kind]).observe(score as f64);
}

pub fn set_corpus_size(n: usize) {
    METRIC_CORPUS_SIZE.set(n as i64);
}

/// 以 Prometheus 文本格式导出所有指标
pub fn gather_text() -> String {
    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&gather(), &mut buffer).unwrap_or_default();
    buffer
}
