//! Slice-and-dice treemap layout over an emission tree.

use serde::{Deserialize, Serialize};

use crate::aggregate::TreeNode;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Tile {
    /// Labels from the category down to this node.
    pub path: Vec<String>,
    /// 1 for categories, 2 for subcategories, 3 for model ids.
    pub depth: usize,
    pub value: f64,
    pub rect: Rect,
}

impl Tile {
    pub fn label(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or("")
    }
}

/// Lay out every positive, finite node below `root` inside `bounds`. The
/// first level splits along the longer side and each level below alternates.
pub fn layout(root: &TreeNode, bounds: Rect) -> Vec<Tile> {
    let mut tiles = Vec::new();
    let mut path = Vec::new();
    let root = positive_tree(root);
    split(&root, bounds, bounds.w >= bounds.h, 1, &mut path, &mut tiles);
    tiles
}

fn drawable(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Copy of `root` without non-positive or non-finite nodes. Branch values are
/// recomputed from the kept leaves so no child outweighs its parent.
pub fn positive_tree(root: &TreeNode) -> TreeNode {
    let mut pruned = prune(root).unwrap_or_else(|| TreeNode {
        label: root.label.clone(),
        value: 0.0,
        children: Vec::new(),
    });
    pruned.sort_descending();
    pruned
}

fn prune(node: &TreeNode) -> Option<TreeNode> {
    if node.is_leaf() {
        return drawable(node.value).then(|| node.clone());
    }
    let children: Vec<TreeNode> = node.children.iter().filter_map(prune).collect();
    let value: f64 = children.iter().map(|c| c.value).sum();
    drawable(value).then(|| TreeNode {
        label: node.label.clone(),
        value,
        children,
    })
}

fn split(
    node: &TreeNode,
    rect: Rect,
    horizontal: bool,
    depth: usize,
    path: &mut Vec<String>,
    tiles: &mut Vec<Tile>,
) {
    let total: f64 = node.children.iter().map(|c| c.value).sum();
    if !drawable(total) {
        return;
    }

    let mut offset = 0.0;
    for child in &node.children {
        let share = child.value / total;
        let cell = if horizontal {
            Rect::new(rect.x + offset * rect.w, rect.y, share * rect.w, rect.h)
        } else {
            Rect::new(rect.x, rect.y + offset * rect.h, rect.w, share * rect.h)
        };
        offset += share;

        path.push(child.label.clone());
        tiles.push(Tile {
            path: path.clone(),
            depth,
            value: child.value,
            rect: cell,
        });
        split(child, cell, !horizontal, depth + 1, path, tiles);
        path.pop();
    }
}
