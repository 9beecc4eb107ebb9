/// Korean vocabulary for negative samples
///
/// Everyday words plus near-miss variants of the wake word, so the classifier
/// learns to reject partial and suffixed forms.

/// Wake word in Hangul
pub const WAKE_WORD: &str = "하이넛지";

/// Romanised wake word, used in dataset and model names
pub const WAKE_WORD_ROMANIZED: &str = "hi_nutji";

/// Language tag of the corpus
pub const LANGUAGE: &str = "ko-KR";

/// Near-miss variants of the wake word
pub const NEAR_MISSES: &[&str] = &[
    "하이", "안녕", "넛지", "누지", "하이누지", "하이넛", "넛지야",
    "하이넛지야", "하이넛지요", "하이넛지님", "하이넛지씨",
];

/// Everyday words, numbers, verbs and phrases
pub const EVERYDAY_WORDS: &[&str] = &[
    // greetings and basics
    "안녕하세요", "감사합니다", "죄송합니다", "괜찮습니다", "네", "아니요",
    "좋아요", "싫어요", "맛있어요", "예쁘다", "멋있다", "재미있다",
    "음악", "영화", "책", "컴퓨터", "전화", "시간", "날씨", "음식",
    "학교", "회사", "집", "친구", "가족", "사랑", "행복", "건강",
    // numbers and time
    "하나", "둘", "셋", "넷", "다섯", "여섯", "일곱", "여덟", "아홉", "열",
    "오늘", "내일", "어제", "지금", "나중에", "빨리", "천천히", "많이", "조금",
    // verbs
    "가다", "오다", "먹다", "마시다", "자다", "일어나다", "앉다", "서다",
    "듣다", "보다", "말하다", "웃다", "울다", "뛰다", "걷다", "읽다",
    // feelings
    "기쁘다", "슬프다", "화나다", "무섭다", "놀라다", "걱정하다",
    "편안하다", "피곤하다", "심심하다", "지루하다",
    // phrases
    "여보세요", "잠깐만요", "실례합니다", "수고하세요", "안녕히가세요",
    "잘 지내세요", "또 만나요", "조심하세요", "화이팅", "대박",
];

/// Full negative vocabulary (everyday words, then near misses)
pub fn negative_vocabulary() -> Vec<&'static str> {
    EVERYDAY_WORDS.iter().chain(NEAR_MISSES).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_vocabulary_excludes_wake_word() {
        let vocab = negative_vocabulary();
        assert!(!vocab.contains(&WAKE_WORD));
        assert_eq!(vocab.len(), EVERYDAY_WORDS.len() + NEAR_MISSES.len());
    }

    #[test]
    fn test_vocabulary_is_unique() {
        let vocab = negative_vocabulary();
        let unique: HashSet<_> = vocab.iter().collect();
        assert_eq!(unique.len(), vocab.len());
    }
}
