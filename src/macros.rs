/// Loads a tree from a Newick or XML literal, panicking if the string is malformed.
///
/// # Example
/// ```
/// use phylotree::tree;
/// let tree = tree!("((A:1.0,B:2.0):3.0,C:4.0);");
/// assert_eq!(tree.tip_names(tree.root()), vec!["A", "B", "C"]);
/// ```
#[macro_export]
macro_rules! tree {
    ($e:expr) => {{
        use $crate::io::TreeLoader;
        TreeLoader::new().tree_string($e).build().unwrap()
    }};
}
