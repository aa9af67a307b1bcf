use crate::tree::{CommentNode, Element, Node, TextNode};

/// The ElementVisitor trait is the traversal mechanism for in-place rewrites of
/// template trees.
///
/// Rules:
/// 1. Traversal is depth-first in document order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers call the `walk_*` functions to continue traversal unless
///    pruning is intended.
/// 4. `visit_children` owns the child list, so it may splice nodes in and out.
pub trait ElementVisitor {
    fn visit_element(&mut self, element: &mut Element) {
        walk_element(self, element);
    }

    fn visit_children(&mut self, children: &mut Vec<Node>) {
        walk_children(self, children);
    }

    fn visit_text(&mut self, _text: &mut TextNode) {
        // Leaf
    }

    fn visit_comment(&mut self, _comment: &mut CommentNode) {}
}

pub fn walk_node<V: ElementVisitor + ?Sized>(visitor: &mut V, node: &mut Node) {
    match node {
        Node::Element(e) => visitor.visit_element(e),
        Node::Text(t) => visitor.visit_text(t),
        Node::Comment(c) => visitor.visit_comment(c),
    }
}

pub fn walk_element<V: ElementVisitor + ?Sized>(visitor: &mut V, element: &mut Element) {
    visitor.visit_children(&mut element.children);
}

pub fn walk_children<V: ElementVisitor + ?Sized>(visitor: &mut V, children: &mut Vec<Node>) {
    for node in children.iter_mut() {
        walk_node(visitor, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::QName;

    struct Uppercase;

    impl ElementVisitor for Uppercase {
        fn visit_text(&mut self, text: &mut TextNode) {
            text.value = text.value.to_uppercase();
        }
    }

    struct DropComments(usize);

    impl ElementVisitor for DropComments {
        fn visit_children(&mut self, children: &mut Vec<Node>) {
            let before = children.len();
            children.retain(|n| !matches!(n, Node::Comment(_)));
            self.0 += before - children.len();
            walk_children(self, children);
        }
    }

    fn sample() -> Element {
        let mut inner = Element::new(QName::local("b"));
        inner.children.push(Node::Text(TextNode::new("x")));
        inner.children.push(Node::Comment(CommentNode { value: "c".into() }));
        let mut root = Element::new(QName::local("a")).with_child(inner);
        root.children.push(Node::Comment(CommentNode { value: "d".into() }));
        root
    }

    #[test]
    fn test_visits_nested_text() {
        let mut root = sample();
        Uppercase.visit_element(&mut root);
        assert_eq!(root.child_elements().next().unwrap().text(), "X");
    }

    #[test]
    fn test_children_can_be_spliced() {
        let mut root = sample();
        let mut v = DropComments(0);
        v.visit_element(&mut root);
        assert_eq!(v.0, 2);
        assert_eq!(root.children.len(), 1);
    }
}
