//! d3-flamegraph JSON generation from stackcollapse lines

use serde::Serialize;

/// hierarchical data structure
/// in the form of { name, value, children }
#[derive(Serialize, Default, Debug)]
struct Node {
    name: String,
    value: u64,
    children: Vec<Node>,
}

impl Node {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    fn insert(&mut self, path: &[&str], count: u64) {
        self.value += count;

        let Some((first, rest)) = path.split_first() else {
            return;
        };

        let idx = match self.children.iter().position(|c| c.name == *first) {
            Some(idx) => idx,
            None => {
                self.children.push(Node::named(first));
                self.children.len() - 1
            }
        };
        self.children[idx].insert(rest, count);
    }
}

/// turns stackcollapse lines (`a;b;c 12`) into d3-flamegraph json format
///
/// A line without a count is counted once.
pub fn collapse_to_json<S: AsRef<str>>(stacks: &[S]) -> serde_json::Result<String> {
    let mut root = Node::default();

    for line in stacks {
        let line = line.as_ref();
        let (stack, count) = match line.rsplit_once(' ') {
            Some((stack, count)) => match count.parse::<u64>() {
                Ok(count) => (stack, count),
                Err(_) => (line, 1),
            },
            None => (line, 1),
        };

        let path = stack.split(';').collect::<Vec<_>>();
        root.insert(&path, count);
    }

    serde_json::to_string(&root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization() {
        let x = [
            "a 1",
            "a;b 1",
            "a;b 1",
            "a;b;c 1",
            "a;b;c;d 1",
            "a;b;e 3",
            "f;g 1",
        ];

        assert_eq!(
            collapse_to_json(&x).unwrap(),
            r##"{"name":"","value":9,"children":[{"name":"a","value":8,"children":[{"name":"b","value":7,"children":[{"name":"c","value":2,"children":[{"name":"d","value":1,"children":[]}]},{"name":"e","value":3,"children":[]}]}]},{"name":"f","value":1,"children":[{"name":"g","value":1,"children":[]}]}]}"##
        );
    }

    #[test]
    fn unsorted_input_is_merged() {
        let x = ["0x1;0x2 2", "0x3 1", "0x1 4"];
        assert_eq!(
            collapse_to_json(&x).unwrap(),
            r##"{"name":"","value":7,"children":[{"name":"0x1","value":6,"children":[{"name":"0x2","value":2,"children":[]}]},{"name":"0x3","value":1,"children":[]}]}"##
        );
    }

    #[test]
    fn empty_input() {
        let x: [&str; 0] = [];
        assert_eq!(
            collapse_to_json(&x).unwrap(),
            r##"{"name":"","value":0,"children":[]}"##
        );
    }
}
