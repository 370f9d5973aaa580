//! Flattening of nested snapshots.
//!
//! Forum taxonomies arrive as trees of arbitrary depth. The upsert path wants
//! them as a flat sequence with depth information, processed parents first.

/// A depth-first, pre-order view of a tree rooted at `root`.
///
/// The view is a sequence rather than an iterator: every call to [`iter`](Self::iter)
/// starts again from the root, so it can be walked as many times as needed.
#[derive(Debug, Clone, Copy)]
pub struct DepthFirst<'a, T, F> {
    root: &'a T,
    children: F,
}

/// Flatten the tree under `root` into `(node, depth)` pairs, root at depth 0.
pub fn flatten<'a, T, F>(root: &'a T, children: F) -> DepthFirst<'a, T, F>
where
    F: Fn(&'a T) -> &'a [T] + Clone,
{
    DepthFirst { root, children }
}

impl<'a, T, F> DepthFirst<'a, T, F>
where
    F: Fn(&'a T) -> &'a [T] + Clone,
{
    pub fn iter(&self) -> DepthFirstIter<'a, T, F> {
        DepthFirstIter { children: self.children.clone(), stack: vec![(self.root, 0)] }
    }
}

impl<'a, T, F> IntoIterator for DepthFirst<'a, T, F>
where
    F: Fn(&'a T) -> &'a [T] + Clone,
{
    type Item = (&'a T, usize);
    type IntoIter = DepthFirstIter<'a, T, F>;

    fn into_iter(self) -> Self::IntoIter {
        DepthFirstIter { children: self.children, stack: vec![(self.root, 0)] }
    }
}

impl<'a, T, F> IntoIterator for &DepthFirst<'a, T, F>
where
    F: Fn(&'a T) -> &'a [T] + Clone,
{
    type Item = (&'a T, usize);
    type IntoIter = DepthFirstIter<'a, T, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`DepthFirst`] view.
#[derive(Debug, Clone)]
pub struct DepthFirstIter<'a, T, F> {
    children: F,
    stack: Vec<(&'a T, usize)>,
}

impl<'a, T, F> Iterator for DepthFirstIter<'a, T, F>
where
    F: Fn(&'a T) -> &'a [T],
{
    type Item = (&'a T, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, depth) = self.stack.pop()?;
        // Reversed so the first child is popped next.
        self.stack.extend((self.children)(node).iter().rev().map(|child| (child, depth + 1)));
        Some((node, depth))
    }
}

/// Flatten one level of nesting, preserving the order of the inner sequences.
///
/// Empty inner sequences are skipped wherever they appear.
pub fn concatenate<S>(sequences: S) -> Concat<S::IntoIter>
where
    S: IntoIterator,
    S::Item: IntoIterator,
{
    Concat { outer: sequences.into_iter(), current: None }
}

/// Iterator returned by [`concatenate`].
pub struct Concat<I>
where
    I: Iterator,
    I::Item: IntoIterator,
{
    outer: I,
    current: Option<<I::Item as IntoIterator>::IntoIter>,
}

impl<I> Clone for Concat<I>
where
    I: Iterator + Clone,
    I::Item: IntoIterator,
    <I::Item as IntoIterator>::IntoIter: Clone,
{
    fn clone(&self) -> Self {
        Self { outer: self.outer.clone(), current: self.current.clone() }
    }
}

impl<I> Iterator for Concat<I>
where
    I: Iterator,
    I::Item: IntoIterator,
{
    type Item = <I::Item as IntoIterator>::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(inner) = self.current.as_mut() {
                if let Some(item) = inner.next() {
                    return Some(item);
                }
            }
            self.current = Some(self.outer.next()?.into_iter());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Node {
        name: &'static str,
        children: Vec<Node>,
    }

    impl Node {
        fn leaf(name: &'static str) -> Self {
            Node { name, children: Vec::new() }
        }

        fn children(&self) -> &[Node] {
            &self.children
        }
    }

    fn names<'a>(seq: impl IntoIterator<Item = (&'a Node, usize)>) -> Vec<(&'static str, usize)> {
        seq.into_iter().map(|(n, d)| (n.name, d)).collect()
    }

    fn sample() -> Node {
        Node { name: "R", children: vec![Node { name: "A", children: vec![Node::leaf("AA")] }, Node::leaf("B")] }
    }

    #[test]
    fn test_flatten_pre_order_with_depth() {
        let root = sample();
        let flat = flatten(&root, Node::children);
        assert_eq!(names(&flat), vec![("R", 0), ("A", 1), ("AA", 2), ("B", 1)]);
    }

    #[test]
    fn test_flatten_childless_root() {
        let root = Node::leaf("solo");
        assert_eq!(names(flatten(&root, Node::children)), vec![("solo", 0)]);
    }

    #[test]
    fn test_flatten_is_restartable() {
        let root = sample();
        let flat = flatten(&root, Node::children);
        let first = names(&flat);
        let second = names(&flat);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_flatten_deep_chain() {
        let mut root = Node::leaf("0");
        for name in ["1", "2", "3", "4"] {
            root = Node { name, children: vec![root] };
        }
        let depths: Vec<usize> = flatten(&root, Node::children).into_iter().map(|(_, d)| d).collect();
        assert_eq!(depths, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_concatenate_preserves_order() {
        let nested = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        let flat: Vec<_> = concatenate(nested).collect();
        assert_eq!(flat, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_concatenate_with_empty_sequences() {
        let nested: Vec<Vec<i32>> = vec![vec![], vec![1], vec![], vec![], vec![2, 3], vec![]];
        let flat: Vec<_> = concatenate(&nested).copied().collect();
        assert_eq!(flat, vec![1, 2, 3]);

        let all_empty: Vec<Vec<i32>> = vec![vec![], vec![]];
        assert_eq!(concatenate(all_empty).count(), 0);

        let none: Vec<Vec<i32>> = Vec::new();
        assert_eq!(concatenate(none).count(), 0);
    }

    #[test]
    fn test_concatenate_flattened_trees() {
        let forest = vec![sample(), Node::leaf("C")];
        let seq = concatenate(forest.iter().map(|root| flatten(root, Node::children)));
        assert_eq!(names(seq), vec![("R", 0), ("A", 1), ("AA", 2), ("B", 1), ("C", 0)]);

        let again = concatenate(forest.iter().map(|root| flatten(root, Node::children)));
        assert_eq!(again.count(), 5);
    }
}
