//! Local content embeddings
//!
//! Deterministic feature-hashing embedder: tokens and adjacent-token
//! bigrams are hashed into a fixed 256-dimension vector with a signed
//! hashing trick, then L2-normalized. No model download, no inference
//! runtime, identical output for identical input on every platform.
//!
//! Cosine similarity over these vectors drives the router's confidence;
//! negative similarity is clamped to zero confidence.

/// Fixed system-wide embedding dimensionality
pub const EMBEDDING_DIM: usize = 256;

/// Embed text into a fixed-length, L2-normalized vector
pub fn embed(text: &str) -> Vec<f32> {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .collect();

    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    for token in &tokens {
        accumulate(&mut vector, token);
    }
    // Bigrams capture local structure single tokens miss
    for pair in tokens.windows(2) {
        accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]));
    }

    l2_normalize(&vector)
}

fn accumulate(vector: &mut [f32], feature: &str) {
    let h = fnv1a64(feature.as_bytes());
    let index = (h % EMBEDDING_DIM as u64) as usize;
    // Signed hashing trick: a high bit decides direction, which keeps
    // collisions from systematically inflating a dimension
    let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
    vector[index] += sign;
}

/// FNV-1a, 64-bit. Stable across platforms and releases, unlike the
/// std hasher.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// L2 normalize a vector
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vec.iter().map(|x| x / norm).collect()
    } else {
        vec.to_vec()
    }
}

/// Cosine similarity between two vectors, range [-1, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Interpret a similarity score as match confidence in [0, 1]
pub fn confidence(similarity: f32) -> f64 {
    (similarity as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_deterministic() {
        let a = embed("def handle_request(req): return req.body");
        let b = embed("def handle_request(req): return req.body");
        assert_eq!(a, b);
    }

    #[test]
    fn test_embed_dimension_and_norm() {
        let v = embed("some code with enough tokens to populate the vector");
        assert_eq!(v.len(), EMBEDDING_DIM);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = embed("");
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!(cosine_similarity(&v, &embed("anything at all")), 0.0);
    }

    #[test]
    fn test_identical_text_full_similarity() {
        let a = embed("query = \"SELECT * FROM users WHERE id = \" + user_id");
        let b = embed("query = \"SELECT * FROM users WHERE id = \" + user_id");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_text_beats_unrelated() {
        let base = embed("for item in items: total += item.price * item.quantity");
        let similar = embed("for item in items: subtotal += item.price * item.quantity");
        let unrelated = embed("class AbstractWidgetFactoryRegistry implements Serializable");
        assert!(cosine_similarity(&base, &similar) > cosine_similarity(&base, &unrelated));
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b)).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_clamps_negative() {
        assert_eq!(confidence(-0.4), 0.0);
        assert_eq!(confidence(0.5), 0.5);
        assert_eq!(confidence(1.0), 1.0);
    }

    #[test]
    fn test_l2_normalize() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }
}
