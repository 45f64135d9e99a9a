//! Deterministic round-robin sharding used when the planning service is
//! unavailable.

use std::collections::HashMap;

use super::{Task, TestCase, TestFormat, TestPlan};

/// Splits `tests` across `parallelism` nodes.
///
/// Tests are sorted by path, then test `i` is assigned to node
/// `i % parallelism`. The result is stable for equal input and every test
/// lands in exactly one task. A `parallelism` of zero is treated as one.
///
/// Every task carries the format of the input tests, which is
/// [`TestFormat::File`] for an empty input.
pub fn create_fallback_plan(tests: &[TestCase], parallelism: usize) -> TestPlan {
    let parallelism = parallelism.max(1);
    let format = tests.first().map(|t| t.format).unwrap_or_default();

    let mut sorted: Vec<&TestCase> = tests.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut tasks: Vec<Task> = (0..parallelism)
        .map(|node_number| Task {
            node_number,
            tests: Vec::new(),
            format: Some(format),
        })
        .collect();

    for (i, test) in sorted.into_iter().enumerate() {
        tasks[i % parallelism].tests.push(test.clone());
    }

    let tasks: HashMap<String, Task> = tasks
        .into_iter()
        .map(|task| (task.node_number.to_string(), task))
        .collect();

    TestPlan {
        tasks,
        fallback: true,
        parallelism,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(plan: &TestPlan, node: usize) -> Vec<&str> {
        plan.task_for_node(node)
            .unwrap()
            .tests
            .iter()
            .map(|t| t.path.as_str())
            .collect()
    }

    #[test]
    fn test_round_robin_over_sorted_paths() {
        let tests: Vec<TestCase> = ["x", "y", "z", "w", "v"]
            .into_iter()
            .map(TestCase::file)
            .collect();

        let plan = create_fallback_plan(&tests, 2);

        assert!(plan.fallback);
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(paths(&plan, 0), vec!["v", "x", "z"]);
        assert_eq!(paths(&plan, 1), vec!["w", "y"]);
    }

    #[test]
    fn test_more_nodes_than_tests() {
        let tests = vec![TestCase::file("b"), TestCase::file("a")];
        let plan = create_fallback_plan(&tests, 4);

        assert_eq!(plan.tasks.len(), 4);
        assert_eq!(paths(&plan, 0), vec!["a"]);
        assert_eq!(paths(&plan, 1), vec!["b"]);
        assert!(paths(&plan, 2).is_empty());
        assert!(paths(&plan, 3).is_empty());
        assert_eq!(plan.task_for_node(3).unwrap().node_number, 3);
    }

    #[test]
    fn test_coverage_and_determinism() {
        let tests: Vec<TestCase> = (0..37)
            .map(|i| TestCase::file(format!("spec/file_{:02}_spec.rb", (i * 7) % 37)))
            .collect();

        for parallelism in 1..=8 {
            let plan = create_fallback_plan(&tests, parallelism);
            assert_eq!(plan, create_fallback_plan(&tests, parallelism));

            let mut seen: Vec<String> = Vec::new();
            for node in 0..parallelism {
                let task_paths = paths(&plan, node);
                let mut sorted = task_paths.clone();
                sorted.sort();
                assert_eq!(task_paths, sorted, "task {} is not sorted", node);
                seen.extend(task_paths.into_iter().map(String::from));
            }

            seen.sort();
            let mut expected: Vec<String> = tests.iter().map(|t| t.path.clone()).collect();
            expected.sort();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_tasks_carry_input_format() {
        let examples = vec![
            TestCase::example("a_spec.rb:3", "A", "works"),
            TestCase::example("a_spec.rb:9", "A", "still works"),
        ];
        let plan = create_fallback_plan(&examples, 3);
        for node in 0..3 {
            assert_eq!(
                plan.task_for_node(node).unwrap().format,
                Some(TestFormat::Example)
            );
        }

        let plan = create_fallback_plan(&[TestCase::file("a_spec.rb")], 2);
        assert_eq!(plan.task_for_node(1).unwrap().format, Some(TestFormat::File));

        let plan = create_fallback_plan(&[], 1);
        assert_eq!(plan.task_for_node(0).unwrap().format, Some(TestFormat::File));
    }

    #[test]
    fn test_zero_parallelism_uses_single_node() {
        let plan = create_fallback_plan(&[TestCase::file("a")], 0);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(paths(&plan, 0), vec!["a"]);
    }
}
