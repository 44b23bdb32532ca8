pub fn vec_map<A, B, F: FnMut(&A) -> B>(v: &[A], f: F) -> Vec<B> {
    v.iter().map(f).collect::<Vec<B>>()
}
