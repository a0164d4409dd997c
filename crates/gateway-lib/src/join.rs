//! Joins instant-vector samples onto function records
//!
//! Each family matches on its own labels:
//! - invocation count and average latency: `function_name == "name.namespace"`
//! - CPU and memory: `container == name` and `namespace == namespace`
//!
//! Every matching sample is added to the record. The latency join is the
//! exception and stores the mean of its matches. None of these functions
//! reset the fields first; callers start from zeroed records.

use crate::models::{FunctionStatus, VectorQueryResponse, VectorQueryResult};

fn matches_function_name(sample: &VectorQueryResult, function: &FunctionStatus) -> bool {
    sample.metric.function_name == function.qualified_name()
}

fn matches_container(sample: &VectorQueryResult, function: &FunctionStatus) -> bool {
    sample.metric.container == function.name && sample.metric.namespace == function.namespace
}

/// Values of all samples accepted by `predicate`, skipping unparsable ones
fn matching_values<'a>(
    metrics: &'a VectorQueryResponse,
    function: &'a FunctionStatus,
    predicate: fn(&VectorQueryResult, &FunctionStatus) -> bool,
) -> impl Iterator<Item = f64> + 'a {
    metrics
        .samples()
        .iter()
        .filter(move |sample| predicate(sample, function))
        .filter_map(VectorQueryResult::parsed_value)
}

/// Add matching invocation totals to `invocation_count`
pub fn merge_invocation_counts(functions: &mut [FunctionStatus], metrics: &VectorQueryResponse) {
    for function in functions.iter_mut() {
        let total: f64 = matching_values(metrics, function, matches_function_name).sum();
        function.invocation_count += total;
    }
}

/// Add matching CPU samples to `usage.cpu`
pub fn merge_cpu_usage(functions: &mut [FunctionStatus], metrics: &VectorQueryResponse) {
    for function in functions.iter_mut() {
        let total: f64 = matching_values(metrics, function, matches_container).sum();
        function.usage_mut().cpu += total;
    }
}

/// Add matching memory samples to `usage.total_memory_bytes`
pub fn merge_memory_usage(functions: &mut [FunctionStatus], metrics: &VectorQueryResponse) {
    for function in functions.iter_mut() {
        let total: f64 = matching_values(metrics, function, matches_container).sum();
        function.usage_mut().total_memory_bytes += total;
    }
}

/// Store the mean of matching latency samples in `invocation_avg_time`.
///
/// Records without a match keep their current value.
pub fn merge_average_latency(functions: &mut [FunctionStatus], metrics: &VectorQueryResponse) {
    for function in functions.iter_mut() {
        let (sum, count) = matching_values(metrics, function, matches_function_name)
            .fold((0.0, 0u32), |(sum, count), value| (sum + value, count + 1));

        if count > 0 {
            function.invocation_avg_time = sum / f64::from(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FunctionUsage, SampleLabels};

    fn function(name: &str, namespace: &str) -> FunctionStatus {
        FunctionStatus {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
        .with_zeroed_metrics()
    }

    fn by_function_name(function_name: &str, value: &str) -> VectorQueryResult {
        VectorQueryResult::new(
            SampleLabels {
                function_name: function_name.to_string(),
                ..Default::default()
            },
            value,
        )
    }

    fn by_container(container: &str, namespace: &str, value: &str) -> VectorQueryResult {
        VectorQueryResult::new(
            SampleLabels {
                container: container.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            value,
        )
    }

    #[test]
    fn test_empty_result_leaves_fields_zero() {
        let mut functions = vec![function("fn1", "ns1"), function("fn2", "ns2")];
        let empty = VectorQueryResponse::default();

        merge_invocation_counts(&mut functions, &empty);
        merge_cpu_usage(&mut functions, &empty);
        merge_memory_usage(&mut functions, &empty);
        merge_average_latency(&mut functions, &empty);

        for f in &functions {
            assert_eq!(f.invocation_count, 0.0);
            assert_eq!(f.invocation_avg_time, 0.0);
            assert_eq!(f.usage, Some(FunctionUsage::default()));
        }
    }

    #[test]
    fn test_invocation_count_matches_qualified_name() {
        let mut functions = vec![function("fn1", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![by_function_name("fn1.ns1", "42")]);

        merge_invocation_counts(&mut functions, &metrics);

        assert_eq!(functions[0].invocation_count, 42.0);
    }

    #[test]
    fn test_invocation_count_is_case_sensitive() {
        let mut functions = vec![function("fn1", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![
            by_function_name("FN1.ns1", "5"),
            by_function_name("fn1", "7"),
        ]);

        merge_invocation_counts(&mut functions, &metrics);

        assert_eq!(functions[0].invocation_count, 0.0);
    }

    #[test]
    fn test_invocation_count_sums_and_skips_bad_values() {
        let mut functions = vec![function("fn1", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![
            by_function_name("fn1.ns1", "10"),
            by_function_name("fn1.ns1", "NaN-ish"),
            by_function_name("fn1.ns1", "2.5"),
        ]);

        merge_invocation_counts(&mut functions, &metrics);

        assert_eq!(functions[0].invocation_count, 12.5);
    }

    #[test]
    fn test_cpu_sums_matching_containers() {
        let mut functions = vec![function("fn1", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![
            by_container("fn1", "ns1", "1.5"),
            by_container("fn1", "ns1", "0.5"),
        ]);

        merge_cpu_usage(&mut functions, &metrics);

        assert_eq!(functions[0].usage.unwrap().cpu, 2.0);
    }

    #[test]
    fn test_cpu_requires_both_labels() {
        let mut functions = vec![function("fn1", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![
            by_container("fn1", "other", "3"),
            by_container("fn2", "ns1", "4"),
            by_function_name("fn1.ns1", "5"),
        ]);

        merge_cpu_usage(&mut functions, &metrics);

        assert_eq!(functions[0].usage.unwrap().cpu, 0.0);
    }

    #[test]
    fn test_summing_is_order_independent() {
        let samples = vec![
            by_container("fn1", "ns1", "1024"),
            by_container("fn1", "ns1", "2048"),
            by_container("fn1", "ns1", "512"),
        ];
        let mut reversed = samples.clone();
        reversed.reverse();

        let mut forward = vec![function("fn1", "ns1")];
        let mut backward = vec![function("fn1", "ns1")];
        merge_memory_usage(&mut forward, &VectorQueryResponse::from_samples(samples));
        merge_memory_usage(&mut backward, &VectorQueryResponse::from_samples(reversed));

        assert_eq!(forward[0].usage.unwrap().total_memory_bytes, 3584.0);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_memory_allocates_missing_usage() {
        let mut functions = vec![FunctionStatus {
            name: "fn1".to_string(),
            namespace: "ns1".to_string(),
            ..Default::default()
        }];
        let metrics = VectorQueryResponse::from_samples(vec![by_container("fn1", "ns1", "64")]);

        merge_memory_usage(&mut functions, &metrics);

        assert_eq!(functions[0].usage.unwrap().total_memory_bytes, 64.0);
    }

    #[test]
    fn test_average_latency_is_mean_of_matches() {
        let mut functions = vec![function("fn1", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![
            by_function_name("fn1.ns1", "0.2"),
            by_function_name("fn1.ns1", "0.8"),
        ]);

        merge_average_latency(&mut functions, &metrics);

        assert!((functions[0].invocation_avg_time - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_average_latency_without_match_stays_zero() {
        let mut functions = vec![function("fn1", "ns1"), function("fn2", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![by_function_name("fn2.ns1", "1.0")]);

        merge_average_latency(&mut functions, &metrics);

        assert_eq!(functions[0].invocation_avg_time, 0.0);
        assert!(!functions[0].invocation_avg_time.is_nan());
        assert_eq!(functions[1].invocation_avg_time, 1.0);
    }

    #[test]
    fn test_average_latency_ignores_container_labels() {
        let mut functions = vec![function("fn1", "ns1")];
        let metrics = VectorQueryResponse::from_samples(vec![by_container("fn1", "ns1", "3.0")]);

        merge_average_latency(&mut functions, &metrics);

        assert_eq!(functions[0].invocation_avg_time, 0.0);
    }

    #[test]
    fn test_non_finite_samples_are_skipped() {
        let mut functions = vec![function("fn1", "ns1")];
        let latency = VectorQueryResponse::from_samples(vec![
            by_function_name("fn1.ns1", "NaN"),
            by_function_name("fn1.ns1", "0.4"),
        ]);
        let invocations = VectorQueryResponse::from_samples(vec![
            by_function_name("fn1.ns1", "+Inf"),
            by_function_name("fn1.ns1", "-Inf"),
            by_function_name("fn1.ns1", "3"),
        ]);

        merge_average_latency(&mut functions, &latency);
        merge_invocation_counts(&mut functions, &invocations);

        assert_eq!(functions[0].invocation_avg_time, 0.4);
        assert_eq!(functions[0].invocation_count, 3.0);
    }

    #[test]
    fn test_nan_only_latency_keeps_json_numeric() {
        let mut functions = vec![function("fn1", "ns1")];
        let latency = VectorQueryResponse::from_samples(vec![by_function_name("fn1.ns1", "NaN")]);

        merge_average_latency(&mut functions, &latency);

        assert_eq!(functions[0].invocation_avg_time, 0.0);
        let json = serde_json::to_string(&functions).unwrap();
        assert!(!json.contains("null"));
        let reparsed: Vec<FunctionStatus> = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed, functions);
    }

    #[test]
    fn test_unmatched_record_is_untouched() {
        let mut functions = vec![function("fn1", "ns1"), function("lonely", "ns9")];
        let before = functions[1].clone();
        let metrics = VectorQueryResponse::from_samples(vec![
            by_function_name("fn1.ns1", "1"),
            by_container("fn1", "ns1", "1"),
        ]);

        merge_invocation_counts(&mut functions, &metrics);
        merge_cpu_usage(&mut functions, &metrics);
        merge_memory_usage(&mut functions, &metrics);
        merge_average_latency(&mut functions, &metrics);

        assert_eq!(functions[1], before);
    }
}
