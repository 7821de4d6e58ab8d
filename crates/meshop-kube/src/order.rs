//! Apply order of objects within a component

use meshop_core::K8sObject;

/// Lower applies first. Kinds not listed sit at 1000.
pub fn kind_priority(kind: &str) -> i32 {
    match kind {
        "CustomResourceDefinition" => -1000,
        "Namespace" => -900,
        "ServiceAccount" | "ClusterRole" => 1,
        "ClusterRoleBinding" | "Role" | "RoleBinding" => 2,
        "ConfigMap" | "Secret" => 100,
        "HorizontalPodAutoscaler" => 1001,
        "Service" => 10000,
        _ => 1000,
    }
}

/// Sort for apply; objects of equal priority keep their manifest order
pub fn sort_for_apply(objects: &mut [K8sObject]) {
    objects.sort_by_key(|o| kind_priority(o.kind()));
}

/// Split off the CRDs, which must be established before anything that uses them
pub fn partition_crds(objects: Vec<K8sObject>) -> (Vec<K8sObject>, Vec<K8sObject>) {
    objects.into_iter().partition(|o| o.kind() == "CustomResourceDefinition")
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshop_core::parse_manifest;

    #[test]
    fn test_sort_for_apply() {
        let manifest = ["Service:a", "Deployment:b", "HorizontalPodAutoscaler:c", "ConfigMap:d", "Deployment:e",
            "ClusterRoleBinding:f", "ServiceAccount:g", "Namespace:h", "CustomResourceDefinition:i"]
            .iter()
            .map(|s| {
                let (kind, name) = s.split_once(':').unwrap();
                format!("apiVersion: v1\nkind: {}\nmetadata:\n  name: {}\n", kind, name)
            })
            .collect::<Vec<_>>()
            .join("---\n");
        let mut objects = parse_manifest(&manifest).unwrap();
        sort_for_apply(&mut objects);
        let names: Vec<_> = objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["i", "h", "g", "f", "d", "b", "e", "c", "a"]);
    }
}
